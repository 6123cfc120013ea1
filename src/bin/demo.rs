//! Voltage BMS Gateway Demo
//!
//! Drives the gateway against the built-in simulator:
//! - Mixed-priority reads and writes through the command queue
//! - Per-field codec behaviour (fixed-point setpoints, clamped hours)
//! - Runtime fault injection and recovery
//!
//! Usage: cargo run --bin demo [config.toml]
//! Without a config file the demo always runs on the simulator.
//! Example: RUST_LOG=debug cargo run --bin demo gateway.toml

use std::path::PathBuf;

use voltage_bms_gateway::logging::init_tracing;
use voltage_bms_gateway::{
    BackendMode, DeviceType, FieldMap, FieldSpec, Gateway, GatewayConfig, Priority, ValueType,
};

fn field(
    device_type: DeviceType,
    name: &str,
    value_type: ValueType,
    function_code: u8,
    address: u16,
) -> FieldSpec {
    FieldSpec {
        site: "demo".to_string(),
        device_type,
        unit_id: 1,
        action: format!("SET_{}", name.to_uppercase()),
        field_name: name.to_string(),
        value_type,
        function_code,
        address,
    }
}

fn demo_field_map() -> FieldMap {
    FieldMap::new(
        1,
        vec![
            field(DeviceType::AirConditioner, "power", ValueType::Boolean, 3, 1),
            field(DeviceType::AirConditioner, "setpoint", ValueType::Setpoint, 3, 2),
            field(DeviceType::AirConditioner, "mode", ValueType::Mode, 3, 3),
            field(DeviceType::AirConditioner, "timer_hour", ValueType::Hour, 3, 4),
            field(DeviceType::AirConditioner, "timer_minute", ValueType::Minute, 3, 5),
            field(DeviceType::Sensor, "room_temperature", ValueType::Temperature, 4, 0),
            field(DeviceType::Sensor, "humidity", ValueType::Humidity, 4, 1),
            field(DeviceType::Sensor, "co2", ValueType::Co2, 4, 2),
            field(DeviceType::AirConditioner, "supply_temperature", ValueType::Temperature, 3, 10),
            field(DeviceType::Cooler, "power", ValueType::Boolean, 3, 52),
            field(DeviceType::Cooler, "alarm", ValueType::Alarm, 4, 60),
        ],
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(None);

    println!("🚀 {}", voltage_bms_gateway::info());
    println!("=============================================\n");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = GatewayConfig::load(config_path.as_deref())?;
    if config_path.is_none() {
        config.mode = BackendMode::Simulated;
    }

    let gateway = Gateway::new(config, demo_field_map());
    let backend = gateway.connect().await?;
    println!("🔌 Connected using {} backend\n", backend);

    // =========================================================================
    // Part 1: Field lookup
    // =========================================================================
    println!("🗺️  Part 1: Reverse Index");
    println!("-------------------------");

    let index = gateway.field_registry().index();
    if let Some(spec) = index.get(3, 52) {
        println!("  fc 3 @52 -> {} / {}", spec.device_type, spec.field_name);
    }
    println!("  {} fields indexed, {} collisions", index.len(), index.collisions());

    // =========================================================================
    // Part 2: Reads
    // =========================================================================
    println!("\n📖 Part 2: Reads");
    println!("----------------");

    let status = gateway.read(1, 3, 1, 5).await;
    println!("  AC block 1-5: {:?}", status.values());

    let sensors = gateway.read(1, 4, 0, 3).await;
    println!("  Sensors 0-2: {:?}", sensors.values());

    let unmapped = gateway.read(1, 1, 100, 4).await;
    println!("  Coils 100-103 (unmapped): {:?}", unmapped.values());

    // =========================================================================
    // Part 3: Writes
    // =========================================================================
    println!("\n✏️  Part 3: Writes");
    println!("-----------------");

    let power = gateway.write(1, 6, 1, true).await;
    println!("  Power on: {}", serde_json::to_string(&power)?);

    let setpoint = gateway.write(1, 6, 2, 21.56).await;
    println!("  Setpoint 21.56 -> {:?}", setpoint.values());

    let hour = gateway.write(1, 6, 4, 30).await;
    println!("  Timer hour 30 -> {:?}", hour.values());

    let rejected = gateway.write(1, 6, 10, 18.0).await;
    println!("  Supply temperature write rejected: {:?}", rejected.error);

    // =========================================================================
    // Part 4: Priority
    // =========================================================================
    println!("\n🚦 Part 4: Priority Lanes");
    println!("-------------------------");

    let (poll, command) = tokio::join!(
        gateway.read_with_priority(1, 4, 0, 3, Priority::Low),
        gateway.write(1, 6, 3, 2),
    );
    println!("  Low poll: {}, high write: {}", poll.timestamp, command.timestamp);
    println!("  Queue: {}", serde_json::to_string(&gateway.queue_status())?);

    // =========================================================================
    // Part 5: Fault injection
    // =========================================================================
    println!("\n💥 Part 5: Fault Injection");
    println!("--------------------------");

    let faults = gateway.fault_injector();
    faults.inject_alarm(DeviceType::Cooler, 3);
    let alarm = gateway.read(1, 4, 60, 1).await;
    println!("  Cooler alarm: {:?}", alarm.values());

    faults.set_communication_failure(true);
    let failed = gateway.read(1, 3, 1, 1).await;
    println!(
        "  During failure: success={} kind={:?}",
        failed.success, failed.error_kind
    );

    faults.reset();
    let recovered = gateway.read(1, 3, 1, 1).await;
    println!("  After reset: success={}", recovered.success);

    // Statistics
    let stats = gateway.queue_stats();
    println!("\n📊 Statistics:");
    println!(
        "  Submitted: {}, executed: {}, failed: {}",
        stats.submitted, stats.executed, stats.failed
    );

    gateway.disconnect().await?;
    println!("\n🎉 Demo completed!");

    Ok(())
}
