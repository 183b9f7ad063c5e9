//! # Security Policy Chain
//!
//! A policy is a `(match, check)` predicate pair with an informational id.
//! `match` partitions the messages the policy cares about; `check` decides
//! acceptance and may contribute attribute bits. Both are side-effect-free
//! over a const-viewed message. Evaluation is strictly in registration
//! order and the first rejecting check short-circuits the chain, sending the
//! message to the discard sink.
//!
//! Which protocol commands are refused is a deployment catalog, not engine
//! behavior; the catalog here guards the geofence and memory introspection
//! of the flight controller against untrusted peers.

use crate::codec::{
    CommandLong, ParamSet, MAV_CMD_DO_FENCE_ENABLE, MAV_CMD_NAV_WAYPOINT, MSG_ID_MEMINFO,
};
use crate::transport::{Message, SourceId};

/// Side-effect-free membership predicate.
pub type MatchFn = fn(&Message) -> bool;

/// Acceptance check. `attribute` is handed the message's current bits and
/// whatever the check leaves there is OR-merged after it returns, so a
/// policy can add tags but never clear them. Returns false to reject.
pub type CheckFn = fn(&Message, &mut u64) -> bool;

/// Informational policy identifiers for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyId {
    AcceptVmc,
    RejectNavWaypoint,
    RejectDisableGeofence,
    RejectMeminfo,
}

/// One registered policy.
pub struct Policy {
    pub id: PolicyId,
    pub matches: MatchFn,
    pub check: CheckFn,
}

/// Upper bound on registered policies; exceeding it is a programming error.
pub const MAX_POLICIES: usize = 16;

/// Ordered policy registry. Policies are registered exactly once per id and
/// never removed.
#[derive(Default)]
pub struct PolicyChain {
    policies: Vec<Policy>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy. Overflowing the chain or re-registering an id halts
    /// the process.
    pub fn register(&mut self, id: PolicyId, matches: MatchFn, check: CheckFn) {
        assert!(
            self.policies.len() < MAX_POLICIES,
            "policy chain overflow registering {:?}",
            id
        );
        assert!(
            self.policies.iter().all(|p| p.id != id),
            "policy {:?} registered twice",
            id
        );
        self.policies.push(Policy { id, matches, check });
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Registration-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }
}

/// Register this deployment's catalog. Installed by `Pipeline::new`.
pub fn register_defaults(chain: &mut PolicyChain) {
    chain.register(PolicyId::AcceptVmc, match_vmc, check_accept);
    chain.register(
        PolicyId::RejectDisableGeofence,
        match_mmc,
        reject_disable_geofence,
    );
    chain.register(PolicyId::RejectMeminfo, match_mmc, reject_meminfo);
}

pub fn match_all(_msg: &Message) -> bool {
    true
}

/// Messages originating from the vehicle/mission computer.
pub fn match_vmc(msg: &Message) -> bool {
    msg.source == SourceId::Vmc
}

/// Messages originating from any untrusted mission peer (legacy or enclave).
pub fn match_mmc(msg: &Message) -> bool {
    matches!(msg.source, SourceId::Legacy | SourceId::Enclave)
}

pub fn check_accept(_msg: &Message, _attribute: &mut u64) -> bool {
    true
}

pub fn check_reject(_msg: &Message, _attribute: &mut u64) -> bool {
    false
}

/// Refuse memory introspection requests from untrusted peers.
pub fn reject_meminfo(msg: &Message, _attribute: &mut u64) -> bool {
    msg.frame.msgid != MSG_ID_MEMINFO
}

/// Refuse direct waypoint injection. Available but not registered by
/// default; kept in the catalog for deployments that need it.
pub fn reject_nav_waypoint(msg: &Message, _attribute: &mut u64) -> bool {
    match CommandLong::decode(&msg.frame) {
        Some(cmd) => cmd.command != MAV_CMD_NAV_WAYPOINT,
        None => true,
    }
}

/// Refuse any attempt to switch the geofence off, whether phrased as a
/// DO_FENCE_ENABLE command with param1 = 0 or as a FENCE_ENABLE* parameter
/// write with value 0.
pub fn reject_disable_geofence(msg: &Message, _attribute: &mut u64) -> bool {
    if let Some(cmd) = CommandLong::decode(&msg.frame) {
        if cmd.command == MAV_CMD_DO_FENCE_ENABLE && cmd.param1 == 0.0 {
            return false;
        }
    } else if let Some(param) = ParamSet::decode(&msg.frame) {
        if param.param_id_str().starts_with("FENCE_ENABLE") && param.param_value == 0.0 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{param_id, Heartbeat, MavFrame, MSG_ID_MEMINFO};

    fn msg_from(frame: MavFrame, source: SourceId) -> Message {
        Message::new(frame, source)
    }

    fn fence_cmd(param1: f32) -> MavFrame {
        CommandLong {
            param1,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
            command: MAV_CMD_DO_FENCE_ENABLE,
            target_system: 1,
            target_component: 0,
            confirmation: 0,
        }
        .encode(255, 0, 0)
    }

    fn fence_param(name: &str, value: f32) -> MavFrame {
        ParamSet {
            param_value: value,
            target_system: 1,
            target_component: 1,
            param_id: param_id(name),
            param_type: 2,
        }
        .encode(255, 0, 0)
    }

    fn heartbeat() -> MavFrame {
        Heartbeat {
            custom_mode: 0,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        }
        .encode(1, 1, 0)
    }

    #[test]
    fn match_predicates_partition_by_source() {
        let vmc = msg_from(heartbeat(), SourceId::Vmc);
        let legacy = msg_from(heartbeat(), SourceId::Legacy);
        let enclave = msg_from(heartbeat(), SourceId::Enclave);

        assert!(match_vmc(&vmc));
        assert!(!match_vmc(&legacy));
        assert!(match_mmc(&legacy));
        assert!(match_mmc(&enclave));
        assert!(!match_mmc(&vmc));
        assert!(match_all(&vmc));
    }

    #[test]
    fn geofence_disable_command_is_rejected() {
        let mut attr = 0;
        let disable = msg_from(fence_cmd(0.0), SourceId::Legacy);
        let enable = msg_from(fence_cmd(1.0), SourceId::Legacy);

        assert!(!reject_disable_geofence(&disable, &mut attr));
        assert!(reject_disable_geofence(&enable, &mut attr));
    }

    #[test]
    fn geofence_disable_parameter_is_rejected() {
        let mut attr = 0;
        assert!(!reject_disable_geofence(
            &msg_from(fence_param("FENCE_ENABLE", 0.0), SourceId::Legacy),
            &mut attr
        ));
        // Prefix match covers vendor suffixes of the parameter name.
        assert!(!reject_disable_geofence(
            &msg_from(fence_param("FENCE_ENABLED", 0.0), SourceId::Legacy),
            &mut attr
        ));
        assert!(reject_disable_geofence(
            &msg_from(fence_param("FENCE_ENABLE", 1.0), SourceId::Legacy),
            &mut attr
        ));
        assert!(reject_disable_geofence(
            &msg_from(fence_param("FENCE_MARGIN", 0.0), SourceId::Legacy),
            &mut attr
        ));
    }

    #[test]
    fn meminfo_is_rejected_other_ids_pass() {
        let mut attr = 0;
        let meminfo = msg_from(
            MavFrame::new_v1(1, 1, 0, MSG_ID_MEMINFO, &[0, 0, 0, 0]),
            SourceId::Legacy,
        );
        assert!(!reject_meminfo(&meminfo, &mut attr));
        assert!(reject_meminfo(
            &msg_from(heartbeat(), SourceId::Legacy),
            &mut attr
        ));
    }

    #[test]
    fn nav_waypoint_command_is_rejected() {
        let mut attr = 0;
        let waypoint = CommandLong {
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 1.0,
            param6: 2.0,
            param7: 3.0,
            command: MAV_CMD_NAV_WAYPOINT,
            target_system: 1,
            target_component: 0,
            confirmation: 0,
        }
        .encode(255, 0, 0);
        assert!(!reject_nav_waypoint(
            &msg_from(waypoint, SourceId::Legacy),
            &mut attr
        ));
        assert!(reject_nav_waypoint(
            &msg_from(fence_cmd(1.0), SourceId::Legacy),
            &mut attr
        ));
        assert!(reject_nav_waypoint(
            &msg_from(heartbeat(), SourceId::Legacy),
            &mut attr
        ));
    }

    #[test]
    fn default_catalog_order_matches_registration() {
        let mut chain = PolicyChain::new();
        register_defaults(&mut chain);
        let ids: Vec<PolicyId> = chain.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                PolicyId::AcceptVmc,
                PolicyId::RejectDisableGeofence,
                PolicyId::RejectMeminfo
            ]
        );
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut chain = PolicyChain::new();
        chain.register(PolicyId::AcceptVmc, match_vmc, check_accept);
        chain.register(PolicyId::AcceptVmc, match_vmc, check_accept);
    }
}
