//! FSM unit tests

use revlay::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentPhase};
use revlay::storage::settings::DeployMode;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new(DeployMode::ZeroDowntime);
    assert_eq!(fsm.phase(), DeploymentPhase::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.step(), 0);
}

#[test]
fn test_fsm_zero_downtime_flow() {
    let mut fsm = DeploymentFsm::new(DeployMode::ZeroDowntime);

    fsm.enter("r1", DeploymentPhase::Preflight).unwrap();
    fsm.enter("r1", DeploymentPhase::Populating).unwrap();
    fsm.enter("r1", DeploymentPhase::Starting).unwrap();
    fsm.enter("r1", DeploymentPhase::HealthChecking).unwrap();
    fsm.enter("r1", DeploymentPhase::SwitchingTraffic).unwrap();
    fsm.enter("r1", DeploymentPhase::DrainingOld).unwrap();
    fsm.enter("r1", DeploymentPhase::Pruning).unwrap();
    fsm.enter("r1", DeploymentPhase::Completed).unwrap();

    assert_eq!(fsm.step(), 8);
    assert!(fsm.phase().is_terminal());
}

#[test]
fn test_fsm_short_downtime_never_switches_traffic() {
    let mut fsm = DeploymentFsm::new(DeployMode::ShortDowntime);

    fsm.enter("r1", DeploymentPhase::Preflight).unwrap();
    fsm.enter("r1", DeploymentPhase::Populating).unwrap();
    assert!(fsm.enter("r1", DeploymentPhase::SwitchingTraffic).is_err());
    assert_eq!(fsm.phase(), DeploymentPhase::StoppingCurrent);
}

#[test]
fn test_fsm_rollback_flow() {
    let mut fsm = DeploymentFsm::new(DeployMode::ShortDowntime);

    fsm.process(DeploymentEvent::Advance).unwrap();
    fsm.process(DeploymentEvent::Fail("health check".to_string())).unwrap();
    assert_eq!(fsm.phase(), DeploymentPhase::Failed);

    fsm.process(DeploymentEvent::RollBack).unwrap();
    assert_eq!(fsm.phase(), DeploymentPhase::RollingBack);

    fsm.process(DeploymentEvent::Restored).unwrap();
    assert_eq!(fsm.phase(), DeploymentPhase::RolledBack);
    assert_eq!(fsm.error(), Some("health check"));
}

#[test]
fn test_fsm_restore_failure_is_critical() {
    let mut fsm = DeploymentFsm::new(DeployMode::ShortDowntime);

    fsm.process(DeploymentEvent::Advance).unwrap();
    fsm.process(DeploymentEvent::Fail("start".to_string())).unwrap();
    fsm.process(DeploymentEvent::RollBack).unwrap();
    fsm.process(DeploymentEvent::RestoreFailed("port busy".to_string())).unwrap();

    assert_eq!(fsm.phase(), DeploymentPhase::Critical);
    assert!(fsm.error().unwrap().contains("port busy"));
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new(DeployMode::ZeroDowntime);

    // Pending -> RollBack is invalid
    assert!(fsm.process(DeploymentEvent::RollBack).is_err());
    assert!(fsm.process(DeploymentEvent::Restored).is_err());
    assert_eq!(fsm.phase(), DeploymentPhase::Pending);
}
