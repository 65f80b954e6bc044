//! Pure diff between desired state and the managed records of the zone
//!
//! Planning performs no I/O so every convergence rule can be checked
//! without a record store.

use std::collections::HashMap;

use crate::config::ZoneConfig;
use crate::model::{DesiredState, DnsRecord, IngressRule, RecordSpec, RecordType, TunnelIdentity};

/// One record operation of a pass, in the order it must be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAction {
    /// Remove an orphaned, duplicate or foreign-typed managed record
    Delete(DnsRecord),
    /// Create a missing record
    Create(RecordSpec),
    /// Rewrite a stale record in place, keeping its id
    Update { id: String, spec: RecordSpec },
}

/// Everything one pass must do to converge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassPlan {
    pub actions: Vec<RecordAction>,
    /// Complete ingress list: dashboard first, catch-all last
    pub ingress: Vec<IngressRule>,
}

impl PassPlan {
    /// True when no record needs to change
    pub fn is_converged(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Existing CNAME/TXT pair for one managed hostname
#[derive(Default)]
struct ManagedRecordSet<'a> {
    cname: Option<&'a DnsRecord>,
    txt: Option<&'a DnsRecord>,
}

/// Compute the actions and ingress list converging `managed` onto `desired`
///
/// `managed` holds the records carrying the server tag under the zone
/// suffix, in any order.
pub fn plan_pass(
    zone: &ZoneConfig,
    tunnel: &TunnelIdentity,
    desired: &DesiredState,
    managed: &[DnsRecord],
) -> PassPlan {
    let mut actions = Vec::new();
    let mut sets: HashMap<&str, ManagedRecordSet<'_>> = HashMap::new();

    for record in managed {
        let Some(port) = zone.port_key(&record.name) else {
            tracing::debug!("Ignoring record {} outside zone {}", record.name, zone.domain);
            continue;
        };

        if !desired.contains_port(port) {
            actions.push(RecordAction::Delete(record.clone()));
            continue;
        }

        let expected = match record.record_type {
            RecordType::Cname => RecordSpec::tunnel_cname(
                record.name.as_str(),
                &tunnel.id,
                zone.server_record_tag.as_str(),
            ),
            RecordType::Txt => {
                RecordSpec::tunnel_marker(record.name.as_str(), zone.server_record_tag.as_str())
            }
            _ => {
                actions.push(RecordAction::Delete(record.clone()));
                continue;
            }
        };

        let set = sets.entry(port).or_default();
        let slot = match record.record_type {
            RecordType::Cname => &mut set.cname,
            _ => &mut set.txt,
        };

        let keep_new = match *slot {
            None => true,
            // Two records of one type under one name: keep a correct one if any
            Some(kept) if !expected.is_satisfied_by(kept) && expected.is_satisfied_by(record) => {
                actions.push(RecordAction::Delete(kept.clone()));
                true
            }
            Some(_) => {
                actions.push(RecordAction::Delete(record.clone()));
                false
            }
        };
        if keep_new {
            *slot = Some(record);
        }
    }

    let mut ingress = Vec::with_capacity(desired.len() + 2);
    ingress.push(IngressRule::route(
        zone.dashboard_hostname(),
        zone.dashboard_service.as_str(),
    ));

    for backend in desired.iter() {
        let name = zone.hostname(&backend.port);
        let set = sets.get(backend.port.as_str());

        let cname = RecordSpec::tunnel_cname(
            name.as_str(),
            &tunnel.id,
            zone.server_record_tag.as_str(),
        );
        push_upsert(&mut actions, cname, set.and_then(|s| s.cname));

        let txt = RecordSpec::tunnel_marker(name.as_str(), zone.server_record_tag.as_str());
        push_upsert(&mut actions, txt, set.and_then(|s| s.txt));

        ingress.push(IngressRule::route(
            name,
            format!(
                "tcp://{}:{}",
                zone.container_name(&backend.id),
                backend.port
            ),
        ));
    }

    ingress.push(IngressRule::catch_all());

    PassPlan { actions, ingress }
}

fn push_upsert(actions: &mut Vec<RecordAction>, spec: RecordSpec, existing: Option<&DnsRecord>) {
    match existing {
        None => actions.push(RecordAction::Create(spec)),
        Some(record) if !spec.is_satisfied_by(record) => actions.push(RecordAction::Update {
            id: record.id.clone(),
            spec,
        }),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendService, TUNNEL_TXT_MARKER};

    fn zone() -> ZoneConfig {
        ZoneConfig::new("example.com", "panel", "mc-server", "mc-dashboard")
    }

    fn tunnel() -> TunnelIdentity {
        TunnelIdentity::new("abc123", "token")
    }

    fn managed(id: &str, record_type: RecordType, port: &str, content: &str) -> DnsRecord {
        DnsRecord {
            id: id.to_string(),
            record_type,
            name: format!("{}.example.com", port),
            content: content.to_string(),
            comment: Some("mc-server".to_string()),
            proxied: None,
        }
    }

    fn desired(pairs: &[(&str, &str)]) -> DesiredState {
        DesiredState::from_backends(pairs.iter().map(|(id, port)| BackendService::new(*id, *port)))
    }

    #[test]
    fn test_empty_zone_creates_pairs_and_full_ingress() {
        let plan = plan_pass(
            &zone(),
            &tunnel(),
            &desired(&[("1", "25565"), ("2", "25566")]),
            &[],
        );

        let creates: Vec<_> = plan
            .actions
            .iter()
            .map(|a| match a {
                RecordAction::Create(spec) => (spec.record_type, spec.name.clone(), spec.content.clone()),
                other => panic!("unexpected action {:?}", other),
            })
            .collect();
        assert_eq!(
            creates,
            vec![
                (RecordType::Cname, "25565.example.com".to_string(), "abc123.cfargotunnel.com".to_string()),
                (RecordType::Txt, "25565.example.com".to_string(), TUNNEL_TXT_MARKER.to_string()),
                (RecordType::Cname, "25566.example.com".to_string(), "abc123.cfargotunnel.com".to_string()),
                (RecordType::Txt, "25566.example.com".to_string(), TUNNEL_TXT_MARKER.to_string()),
            ]
        );

        assert_eq!(
            plan.ingress,
            vec![
                IngressRule::route("panel.example.com", "http://discopanel:8080"),
                IngressRule::route("25565.example.com", "tcp://discopanel-server-1:25565"),
                IngressRule::route("25566.example.com", "tcp://discopanel-server-2:25566"),
                IngressRule::catch_all(),
            ]
        );
    }

    #[test]
    fn test_converged_zone_plans_nothing() {
        let records = vec![
            managed("c1", RecordType::Cname, "25565", "abc123.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", TUNNEL_TXT_MARKER),
        ];
        let plan = plan_pass(&zone(), &tunnel(), &desired(&[("1", "25565")]), &records);
        assert!(plan.is_converged());
        assert_eq!(plan.ingress.len(), 3);
    }

    #[test]
    fn test_orphans_deleted_record_by_record() {
        // Port 25566 only has a TXT left; it must still go
        let records = vec![
            managed("c1", RecordType::Cname, "25565", "abc123.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", TUNNEL_TXT_MARKER),
            managed("t2", RecordType::Txt, "25566", TUNNEL_TXT_MARKER),
        ];
        let plan = plan_pass(&zone(), &tunnel(), &desired(&[("1", "25565")]), &records);
        assert_eq!(plan.actions, vec![RecordAction::Delete(records[2].clone())]);
    }

    #[test]
    fn test_stale_content_updated_in_place() {
        let records = vec![
            managed("c1", RecordType::Cname, "25565", "old.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", "\"stale\""),
        ];
        let plan = plan_pass(&zone(), &tunnel(), &desired(&[("1", "25565")]), &records);

        assert_eq!(plan.actions.len(), 2);
        match &plan.actions[0] {
            RecordAction::Update { id, spec } => {
                assert_eq!(id, "c1");
                assert_eq!(spec.content, "abc123.cfargotunnel.com");
            }
            other => panic!("expected update, got {:?}", other),
        }
        match &plan.actions[1] {
            RecordAction::Update { id, spec } => {
                assert_eq!(id, "t1");
                assert_eq!(spec.content, TUNNEL_TXT_MARKER);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_cname_keeps_correct_one() {
        let records = vec![
            managed("c-stale", RecordType::Cname, "25565", "old.cfargotunnel.com"),
            managed("c-good", RecordType::Cname, "25565", "abc123.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", TUNNEL_TXT_MARKER),
        ];
        let plan = plan_pass(&zone(), &tunnel(), &desired(&[("1", "25565")]), &records);
        assert_eq!(plan.actions, vec![RecordAction::Delete(records[0].clone())]);
    }

    #[test]
    fn test_foreign_type_under_managed_name_deleted() {
        let records = vec![
            managed("c1", RecordType::Cname, "25565", "abc123.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", TUNNEL_TXT_MARKER),
            managed("a1", RecordType::A, "25565", "192.0.2.1"),
        ];
        let plan = plan_pass(&zone(), &tunnel(), &desired(&[("1", "25565")]), &records);
        assert_eq!(plan.actions, vec![RecordAction::Delete(records[2].clone())]);
    }

    #[test]
    fn test_duplicate_port_yields_single_record_set() {
        let plan = plan_pass(
            &zone(),
            &tunnel(),
            &desired(&[("1", "25565"), ("2", "25565")]),
            &[],
        );
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.ingress.len(), 3);
        assert_eq!(
            plan.ingress[1],
            IngressRule::route("25565.example.com", "tcp://discopanel-server-2:25565")
        );
    }

    #[test]
    fn test_mixed_case_domain_matches_lowercase_records() {
        let zone = ZoneConfig::new("Example.com", "Panel", "mc-server", "mc-dashboard");
        let records = vec![
            managed("c1", RecordType::Cname, "25565", "abc123.cfargotunnel.com"),
            managed("t1", RecordType::Txt, "25565", TUNNEL_TXT_MARKER),
            managed("c2", RecordType::Cname, "30000", "abc123.cfargotunnel.com"),
        ];

        let plan = plan_pass(&zone, &tunnel(), &desired(&[("1", "25565")]), &records);

        assert_eq!(plan.actions, vec![RecordAction::Delete(records[2].clone())]);
        assert_eq!(
            plan.ingress[0],
            IngressRule::route("panel.example.com", "http://discopanel:8080")
        );
        assert_eq!(
            plan.ingress[1],
            IngressRule::route("25565.example.com", "tcp://discopanel-server-1:25565")
        );
    }
}
