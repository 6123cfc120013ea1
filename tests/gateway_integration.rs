//! End-to-end gateway behaviour on the simulated backend

use std::time::{Duration, Instant};

use voltage_bms_gateway::{
    Backend, BackendMode, DeviceType, ErrorKind, FieldMap, FieldSpec, FieldValue, Gateway,
    GatewayConfig, Priority, SerialSettings, SimulationSettings, ValueType,
};

fn field(
    site: &str,
    device_type: DeviceType,
    name: &str,
    value_type: ValueType,
    address: u16,
) -> FieldSpec {
    FieldSpec {
        site: site.to_string(),
        device_type,
        unit_id: 1,
        action: format!("SET_{}", name.to_uppercase()),
        field_name: name.to_string(),
        value_type,
        function_code: 3,
        address,
    }
}

fn field_map() -> FieldMap {
    FieldMap::new(
        1,
        vec![
            field("north", DeviceType::AirConditioner, "power", ValueType::Boolean, 1),
            field("north", DeviceType::AirConditioner, "setpoint", ValueType::Setpoint, 2),
            field("north", DeviceType::Cooler, "power", ValueType::Boolean, 52),
            field("north", DeviceType::Sensor, "temperature", ValueType::Temperature, 60),
        ],
    )
}

fn gateway(latency_ms: u64) -> Gateway {
    let config = GatewayConfig::default()
        .with_mode(BackendMode::Simulated)
        .with_serial(SerialSettings::for_port("/dev/voltage-bms-gateway-missing-port"))
        .with_simulation(SimulationSettings {
            latency_ms,
            seed: Some(2024),
            ..SimulationSettings::default()
        });
    Gateway::new(config, field_map())
}

#[tokio::test]
async fn test_high_priority_write_within_latency_window() {
    let gateway = gateway(70);
    assert_eq!(gateway.connect().await.unwrap(), Backend::Simulated);

    let started = Instant::now();
    let result = gateway
        .write_with_priority(1, 6, 1, true, Priority::High)
        .await;
    let elapsed = started.elapsed();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.values(), &[FieldValue::Bool(true)]);
    assert!(elapsed >= Duration::from_millis(70));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_injected_failure_reported_as_unsuccessful_result() {
    let gateway = gateway(1);
    gateway.connect().await.unwrap();
    gateway.fault_injector().set_communication_failure(true);

    let result = gateway.read(1, 3, 1, 2).await;
    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.error_kind, Some(ErrorKind::ConnectionError));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["errorKind"], "CONNECTION_ERROR");

    gateway.fault_injector().set_communication_failure(false);
    assert!(gateway.read(1, 3, 1, 2).await.success);
}

#[tokio::test]
async fn test_reverse_index_resolves_cooler_power() {
    let gateway = gateway(0);
    gateway.connect().await.unwrap();

    let index = gateway.field_registry().index();
    let spec = index.get(3, 52).unwrap();
    assert_eq!(spec.device_type, DeviceType::Cooler);
    assert_eq!(spec.field_name, "power");

    let result = gateway.read(1, 3, 52, 1).await;
    assert!(matches!(result.values()[0], FieldValue::Bool(_)));
}

#[tokio::test]
async fn test_read_only_write_has_no_side_effects() {
    let gateway = gateway(0);
    gateway.connect().await.unwrap();

    let result = gateway.write(1, 6, 60, 19.5).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
}

#[tokio::test]
async fn test_queue_status_reports_lanes() {
    let gateway = gateway(20);
    gateway.connect().await.unwrap();

    let first = gateway.submit(
        voltage_bms_gateway::Operation::Read { quantity: 1 },
        1,
        3,
        1,
        Priority::Normal,
    );
    let low = gateway.submit(
        voltage_bms_gateway::Operation::Read { quantity: 1 },
        1,
        3,
        2,
        Priority::Low,
    );
    tokio::task::yield_now().await;

    let status = gateway.queue_status();
    assert!(status.is_processing);
    assert_eq!(
        status.total_commands,
        status.high_priority + status.normal_priority + status.low_priority
    );

    assert!(first.await.unwrap().success);
    assert!(low.await.unwrap().success);
}
