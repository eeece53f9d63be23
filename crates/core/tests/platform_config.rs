//! Tests for PlatformConfig builder and defaults.

use ptides_core::{Boundary, PlatformConfig, PolicyKind, SafetyMargins, TieBreakKind, Time};

#[test]
fn platform_config_builder() {
    let config = PlatformConfig::builder()
        .name("TestPlatform")
        .sync_error(Time::from_millis(2))
        .network_delay(Time::from_millis(10))
        .boundary(Boundary::NoDependency)
        .queue_capacity(64)
        .receiver_capacity(8)
        .tie_break(TieBreakKind::Priority)
        .policy(PolicyKind::Edf)
        .build();

    assert_eq!(config.name, "TestPlatform");
    assert_eq!(config.sync_error, Time::from_millis(2));
    assert_eq!(config.network_delay, Time::from_millis(10));
    assert_eq!(config.boundary, Boundary::NoDependency);
    assert_eq!(config.queue_capacity, Some(64));
    assert_eq!(config.receiver_capacity, Some(8));
    assert_eq!(config.tie_break, TieBreakKind::Priority);
    assert_eq!(config.policy, PolicyKind::Edf);
    assert_eq!(
        config.margins(),
        SafetyMargins {
            sync_error: Time::from_millis(2),
            network_delay: Time::from_millis(10),
        }
    );
}

#[test]
fn platform_config_default() {
    let config = PlatformConfig::default();

    assert_eq!(config.name, "platform");
    assert_eq!(config.sync_error, Time::ZERO);
    assert_eq!(config.network_delay, Time::ZERO);
    assert_eq!(config.boundary, Boundary::ZeroDelay);
    assert_eq!(config.queue_capacity, None);
    assert_eq!(config.receiver_capacity, None);
    assert_eq!(config.tie_break, TieBreakKind::InsertionOrder);
    assert_eq!(config.policy, PolicyKind::Timestamp);
    assert!(config.idle_callback.is_none());
}

#[test]
fn platform_idle_callback() {
    fn idle_callback() {}

    let config = PlatformConfig::builder().idle_callback(idle_callback).build();

    assert!(config.idle_callback.is_some());
}

#[test]
fn tie_break_strategy_follows_the_kind() {
    let config = PlatformConfig::builder()
        .tie_break(TieBreakKind::NumericPayload)
        .build();
    assert_eq!(format!("{:?}", config.tie_break_strategy()), "NumericPayload");
}

#[cfg(feature = "serde")]
#[test]
fn platform_config_derives_serde() {
    fn assert_serde<T: serde::Serialize + serde::de::DeserializeOwned>() {}
    assert_serde::<PlatformConfig>();
    assert_serde::<SafetyMargins>();
}

#[test]
fn negative_bounds_are_rejected() {
    use ptides_core::ConfigurationError;

    let config = PlatformConfig::builder()
        .sync_error(Time::from_millis(-1))
        .build();
    assert_eq!(
        config.validate().unwrap_err(),
        ConfigurationError::InvalidBound {
            name: "sync_error",
            value: Time::from_millis(-1),
        }
    );
    assert!(PlatformConfig::default().validate().is_ok());
}
