//! Parameters for the PrometheusRule alerts shipped with the cluster.
//!
//! The document produced here is consumed by the rule templates, so its
//! field names and alert keys are fixed.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Numeric limit of an alert
///
/// Most limits are ratios; flapping counts restarts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// A whole number of events
    Count(i64),
    /// A fraction or rate
    Ratio(f64),
}

/// Alertmanager severity label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[allow(missing_docs)]
    Critical,
    #[allow(missing_docs)]
    Warning,
    #[allow(missing_docs)]
    Info,
}

/// Severity level shown by the console
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    #[allow(missing_docs)]
    Error,
    #[allow(missing_docs)]
    Warning,
    #[allow(missing_docs)]
    Info,
}

/// Parameters of one alert
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// Threshold, only for alerts that compare against one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Threshold>,
    /// Rate window, only for OSD flapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osd_up_rate: Option<String>,
    /// How long the condition must hold before firing
    #[serde(rename = "for")]
    pub duration: String,
    /// Console severity level
    pub severity_level: SeverityLevel,
    /// Alertmanager severity
    pub severity: Severity,
}

/// Caller supplied changes to one alert; unset fields keep the default
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AlertRuleOverride {
    #[allow(missing_docs)]
    pub limit: Option<Threshold>,
    #[allow(missing_docs)]
    pub osd_up_rate: Option<String>,
    #[allow(missing_docs)]
    #[serde(rename = "for")]
    pub duration: Option<String>,
    #[allow(missing_docs)]
    pub severity_level: Option<SeverityLevel>,
    #[allow(missing_docs)]
    pub severity: Option<Severity>,
}

/// Labels the prometheus operator selects the rule on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLabels {
    #[allow(missing_docs)]
    pub prometheus: String,
    #[allow(missing_docs)]
    pub role: String,
}

impl Default for RuleLabels {
    fn default() -> Self {
        Self {
            prometheus: "rook-prometheus".into(),
            role: "alert-rules".into(),
        }
    }
}

/// The full alert parameter document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleSet {
    /// Rule selection labels
    pub labels: RuleLabels,
    /// Alert parameters keyed by alert name
    pub alerts: BTreeMap<String, AlertRule>,
}

use self::{Severity as Sev, SeverityLevel as Lvl, Threshold::*};

#[rustfmt::skip]
const CATALOG: &[(&str, Option<Threshold>, &str, Sev, Lvl)] = &[
    ("cephMgrIsAbsent",                       None,              "5m",  Sev::Critical, Lvl::Error),
    ("cephMgrIsMissingReplicas",              None,              "5m",  Sev::Warning,  Lvl::Warning),
    ("cephMdsMissingReplicas",                None,              "5m",  Sev::Warning,  Lvl::Warning),
    ("cephMonQuorumAtRisk",                   None,              "15m", Sev::Critical, Lvl::Error),
    ("cephMonQuorumLost",                     None,              "5m",  Sev::Critical, Lvl::Error),
    ("cephMonHighNumberOfLeaderChanges",      Some(Ratio(0.95)), "5m",  Sev::Warning,  Lvl::Warning),
    ("cephNodeDown",                          None,              "30s", Sev::Critical, Lvl::Error),
    ("cephOSDCriticallyFull",                 Some(Ratio(0.80)), "40s", Sev::Critical, Lvl::Error),
    ("cephOSDFlapping",                       Some(Count(5)),    "0s",  Sev::Critical, Lvl::Error),
    ("cephOSDNearFull",                       Some(Ratio(0.75)), "40s", Sev::Warning,  Lvl::Warning),
    ("cephOSDDiskNotResponding",              None,              "15m", Sev::Critical, Lvl::Error),
    ("cephOSDDiskUnavailable",                None,              "1m",  Sev::Critical, Lvl::Error),
    ("cephOSDSlowOps",                        None,              "30s", Sev::Warning,  Lvl::Warning),
    ("cephDataRecoveryTakingTooLong",         None,              "2h",  Sev::Warning,  Lvl::Warning),
    ("cephPGRepairTakingTooLong",             None,              "1h",  Sev::Warning,  Lvl::Warning),
    ("PersistentVolumeUsageNearFull",         Some(Ratio(0.75)), "5s",  Sev::Warning,  Lvl::Warning),
    ("PersistentVolumeUsageCritical",         Some(Ratio(0.85)), "5s",  Sev::Critical, Lvl::Error),
    ("cephClusterErrorState",                 None,              "10m", Sev::Critical, Lvl::Error),
    ("cephClusterWarningState",               None,              "15m", Sev::Warning,  Lvl::Warning),
    ("cephOSDVersionMismatch",                None,              "10m", Sev::Warning,  Lvl::Warning),
    ("cephMonVersionMismatch",                None,              "10m", Sev::Warning,  Lvl::Warning),
    ("cephClusterNearFull",                   Some(Ratio(0.75)), "5s",  Sev::Warning,  Lvl::Warning),
    ("cephClusterCriticallyFull",             Some(Ratio(0.80)), "5s",  Sev::Critical, Lvl::Error),
    ("cephClusterReadOnly",                   Some(Ratio(0.85)), "0s",  Sev::Critical, Lvl::Error),
    ("cephPoolQuotaBytesNearExhaustion",      Some(Ratio(0.70)), "1m",  Sev::Warning,  Lvl::Warning),
    ("cephPoolQuotaBytesCriticallyExhausted", Some(Ratio(0.90)), "1m",  Sev::Critical, Lvl::Error),
];

const OSD_FLAPPING: &str = "cephOSDFlapping";
const OSD_FLAPPING_UP_RATE: &str = "5m";

impl AlertRuleSet {
    /// The built-in alert parameters
    pub fn catalog() -> Self {
        let alerts = CATALOG
            .iter()
            .map(|&(name, limit, duration, severity, severity_level)| {
                let rule = AlertRule {
                    limit,
                    osd_up_rate: (name == OSD_FLAPPING).then(|| OSD_FLAPPING_UP_RATE.to_string()),
                    duration: duration.into(),
                    severity_level,
                    severity,
                };
                (name.to_string(), rule)
            })
            .collect();
        Self {
            labels: RuleLabels::default(),
            alerts,
        }
    }

    /// Render the document as YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

/// The built-in catalog with `overrides` applied per alert
///
/// Every override must name a catalog alert, and may only set a limit or
/// rate window the alert already has.
pub fn parameterize_alert_rules(overrides: &BTreeMap<String, AlertRuleOverride>) -> Result<AlertRuleSet> {
    let mut rules = AlertRuleSet::catalog();
    for (name, o) in overrides {
        let rule = rules
            .alerts
            .get_mut(name)
            .ok_or_else(|| Error::Validation(format!("unknown alert {name:?}")))?;
        if o.limit.is_some() && rule.limit.is_none() {
            return Err(Error::Validation(format!("alert {name:?} has no limit to override")));
        }
        if let Some(Threshold::Ratio(limit)) = o.limit {
            if !limit.is_finite() {
                return Err(Error::Validation(format!("alert {name:?} limit must be a finite number")));
            }
        }
        if o.osd_up_rate.is_some() && rule.osd_up_rate.is_none() {
            return Err(Error::Validation(format!("alert {name:?} has no osdUpRate to override")));
        }
        if let Some(limit) = o.limit {
            rule.limit = Some(limit);
        }
        if let Some(rate) = &o.osd_up_rate {
            rule.osd_up_rate = Some(rate.clone());
        }
        if let Some(duration) = &o.duration {
            rule.duration = duration.clone();
        }
        if let Some(severity) = o.severity {
            rule.severity = severity;
        }
        if let Some(level) = o.severity_level {
            rule.severity_level = level;
        }
    }
    tracing::debug!(overrides = overrides.len(), "parameterized alert rules");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn overrides(yaml: &str) -> BTreeMap<String, AlertRuleOverride> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn catalog_is_complete() {
        let catalog = AlertRuleSet::catalog();
        assert_eq!(catalog.alerts.len(), 26);
        let with_limit = catalog.alerts.values().filter(|r| r.limit.is_some()).count();
        assert_eq!(with_limit, 11);
    }

    #[test]
    fn empty_overrides_return_catalog() {
        assert_eq!(parameterize_alert_rules(&BTreeMap::new()).unwrap(), AlertRuleSet::catalog());
    }

    #[test]
    fn overrides_are_idempotent() {
        let o = overrides(
            r#"
            cephOSDNearFull:
              limit: 0.8
              for: 1m
            cephMgrIsAbsent:
              severity: warning
            "#,
        );
        let once = parameterize_alert_rules(&o).unwrap();
        let twice = parameterize_alert_rules(&o).unwrap();
        assert_eq!(once, twice);

        let near_full = &once.alerts["cephOSDNearFull"];
        assert_eq!(near_full.limit, Some(Threshold::Ratio(0.8)));
        assert_eq!(near_full.duration, "1m");
        assert_eq!(near_full.severity, Severity::Warning);
        let absent = &once.alerts["cephMgrIsAbsent"];
        assert_eq!(absent.severity, Severity::Warning);
        assert_eq!(absent.severity_level, SeverityLevel::Error);
        assert_eq!(absent.duration, "5m");
    }

    #[test]
    fn unknown_alert_is_rejected() {
        let err = parameterize_alert_rules(&overrides("cephFooBar:\n  for: 1m\n")).unwrap_err();
        assert_eq!(err, Error::Validation("unknown alert \"cephFooBar\"".into()));
    }

    #[test]
    fn limit_on_limitless_alert_is_rejected() {
        let err = parameterize_alert_rules(&overrides("cephNodeDown:\n  limit: 3\n")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = parameterize_alert_rules(&overrides("cephOSDNearFull:\n  osdUpRate: 1m\n")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn non_finite_limits_are_rejected() {
        for limit in [".nan", ".inf", "-.inf"] {
            let o = overrides(&format!("cephOSDNearFull:\n  limit: {limit}\n"));
            let err = parameterize_alert_rules(&o).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{limit}");
        }
    }

    #[test]
    fn misspelled_override_fields_fail_to_parse() {
        for typo in ["fro: 1m", "severityLvl: error"] {
            let parsed = serde_yaml::from_str::<BTreeMap<String, AlertRuleOverride>>(&format!(
                "cephMgrIsAbsent:\n  {typo}\n"
            ));
            assert!(parsed.is_err(), "{typo}");
        }
    }

    #[test]
    fn document_schema() {
        let rules = parameterize_alert_rules(&overrides("cephOSDFlapping:\n  limit: 3\n")).unwrap();
        let doc = serde_json::to_value(&rules).unwrap();
        assert_json_eq!(doc["labels"], json!({"prometheus": "rook-prometheus", "role": "alert-rules"}));
        assert_json_eq!(
            doc["alerts"]["cephOSDFlapping"],
            json!({
                "limit": 3,
                "osdUpRate": "5m",
                "for": "0s",
                "severity": "critical",
                "severityLevel": "error",
            })
        );
        assert_json_eq!(
            doc["alerts"]["PersistentVolumeUsageCritical"],
            json!({"limit": 0.85, "for": "5s", "severity": "critical", "severityLevel": "error"})
        );
        assert_json_eq!(
            doc["alerts"]["cephMonQuorumLost"],
            json!({"for": "5m", "severity": "critical", "severityLevel": "error"})
        );
    }

    #[test]
    fn yaml_round_trips_through_templates() {
        let yaml = AlertRuleSet::catalog().to_yaml().unwrap();
        assert!(yaml.contains("cephMgrIsAbsent:"));
        assert!(yaml.contains("severityLevel: error"));
        let parsed: AlertRuleSet = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, AlertRuleSet::catalog());
    }
}
