use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::{
    assembler::MgrAssembler,
    config::{DEFAULT_METRICS_PORT, EXTERNAL_MGR_APP_NAME},
    Result,
};

/// Port name of the metrics service for in-cluster managers
pub const SERVICE_METRICS_PORT_NAME: &str = "http-metrics";

impl MgrAssembler<'_> {
    fn cluster_ip_service(&self, name: String, active_daemon: &str, port_name: &str, port: i32) -> Service {
        let labels = self.selector_labels(active_daemon);
        Service {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.info.namespace.clone()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(labels),
                type_: Some("ClusterIP".into()),
                ports: Some(vec![ServicePort {
                    name: Some(port_name.into()),
                    port,
                    protocol: Some("TCP".into()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            status: None,
        }
    }

    /// Service exposing the prometheus metrics of the active manager
    ///
    /// For an external cluster there are no manager pods to select; the
    /// endpoints are managed out of band.
    pub fn metrics_service(&self, name: &str, active_daemon: &str, port_name: &str) -> Result<Service> {
        let mut svc = self.cluster_ip_service(name.into(), active_daemon, port_name, DEFAULT_METRICS_PORT);
        if name == EXTERNAL_MGR_APP_NAME {
            if let Some(spec) = svc.spec.as_mut() {
                spec.selector = None;
            }
        }
        self.info.owner.set_controller_reference(&mut svc)?;
        tracing::debug!(service = name, active_daemon, "assembled mgr metrics service");
        Ok(svc)
    }

    /// Service exposing the dashboard of the active manager
    ///
    /// The port name tells consumers whether to speak TLS.
    pub fn dashboard_service(&self, name: &str, active_daemon: &str) -> Result<Service> {
        let port_name = if self.spec.dashboard.ssl {
            "https-dashboard"
        } else {
            "http-dashboard"
        };
        let mut svc = self.cluster_ip_service(
            format!("{name}-dashboard"),
            active_daemon,
            port_name,
            self.spec.dashboard_port(),
        );
        self.info.owner.set_controller_reference(&mut svc)?;
        tracing::debug!(service = name, active_daemon, port_name, "assembled mgr dashboard service");
        Ok(svc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::tests::{cluster_info, cluster_spec},
        config::APP_NAME,
        Error,
    };

    fn port(svc: &Service) -> ServicePort {
        svc.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].clone()
    }

    #[test]
    fn metrics_service_selects_active_manager() {
        let info = cluster_info();
        let spec = cluster_spec(2);
        let assembler = MgrAssembler::new(&spec, &info);
        let svc = assembler
            .metrics_service(APP_NAME, "b", SERVICE_METRICS_PORT_NAME)
            .unwrap();
        let svc_spec = svc.spec.as_ref().unwrap();
        assert_eq!(svc_spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(svc_spec.selector.as_ref(), Some(&assembler.selector_labels("b")));
        let p = port(&svc);
        assert_eq!(p.name.as_deref(), Some("http-metrics"));
        assert_eq!(p.port, 9283);
        assert_eq!(svc.metadata.owner_references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn external_metrics_service_has_no_selector() {
        let info = cluster_info();
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        let svc = assembler
            .metrics_service(EXTERNAL_MGR_APP_NAME, "", SERVICE_METRICS_PORT_NAME)
            .unwrap();
        assert_eq!(svc.spec.unwrap().selector, None);
        assert_eq!(svc.metadata.labels.unwrap()["app"], "rook-ceph-mgr");
    }

    #[test]
    fn dashboard_port_name_follows_tls() {
        let info = cluster_info();
        let mut spec = cluster_spec(1);
        let svc = MgrAssembler::new(&spec, &info).dashboard_service(APP_NAME, "a").unwrap();
        assert_eq!(svc.metadata.name.as_deref(), Some("rook-ceph-mgr-dashboard"));
        assert_eq!(port(&svc).name.as_deref(), Some("http-dashboard"));
        assert_eq!(port(&svc).port, 7000);

        spec.dashboard.ssl = true;
        let svc = MgrAssembler::new(&spec, &info).dashboard_service(APP_NAME, "a").unwrap();
        assert_eq!(port(&svc).name.as_deref(), Some("https-dashboard"));
        assert_eq!(port(&svc).port, 8443);
    }

    #[test]
    fn services_need_an_owner() {
        let mut info = cluster_info();
        info.owner.metadata.uid = None;
        let spec = cluster_spec(1);
        let assembler = MgrAssembler::new(&spec, &info);
        assert!(matches!(
            assembler.metrics_service(APP_NAME, "a", SERVICE_METRICS_PORT_NAME),
            Err(Error::Ownership { .. })
        ));
        assert!(matches!(
            assembler.dashboard_service(APP_NAME, "a"),
            Err(Error::Ownership { .. })
        ));
    }
}
