mod common;
use common::*;
use solivia_exporter::config::ExtraKind;
use solivia_exporter::prelude::*;

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn load(yaml: &str) -> Result<ConfigWrapper> {
    Ok(ConfigWrapper::from_config(Config::from_yaml(yaml)?))
}

#[test]
fn defaults() -> Result<()> {
    let config = load("serial:\n  device: /dev/ttyUSB0\n")?;

    let serial = config.serial();
    assert_eq!(serial.baud_rate(), 19200);
    assert_eq!(serial.address(), 1);
    assert_eq!(serial.read_timeout(), Duration::from_millis(1000));
    assert_eq!(serial.write_timeout(), Duration::from_millis(1000));
    assert_eq!(serial.retries(), 2);
    assert_eq!(serial.retry_backoff(), Duration::from_millis(100));
    assert_eq!(config.poll_interval(), Duration::from_secs(30));
    assert!(config.metrics().enabled());
    assert_eq!(config.metrics().namespace(), "solivia");
    assert_eq!(config.cycle_log(), None);
    assert_eq!(config.loglevel(), "info");

    let catalog = config.catalog()?;
    assert_eq!(config.commands(&catalog)?, catalog.codes().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn reads_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(Factory::config_yaml().as_bytes())?;

    let config = ConfigWrapper::new(file.path().to_str().unwrap().to_string())?;
    assert_eq!(config.serial().device(), "/dev/ttyUSB0");
    assert_eq!(config.serial().retries(), 1);
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert!(!config.metrics().enabled());

    Ok(())
}

#[test]
fn missing_file() {
    let err = Config::new("/nonexistent/solivia.yaml".to_string()).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/solivia.yaml"));
}

#[test]
fn commands_by_name_and_code() -> Result<()> {
    let config = load(
        r#"
serial:
  device: /dev/ttyS0
commands: ["AC Power", "0x1303", "day wh", "9901"]
"#,
    )?;
    let catalog = config.catalog()?;

    assert_eq!(
        config.commands(&catalog)?,
        vec![
            CommandCode::new(0x10, 0x09),
            CommandCode::new(0x13, 0x03),
            CommandCode::new(0x99, 0x01),
        ]
    );

    Ok(())
}

#[test]
fn unknown_command_name_is_an_error() -> Result<()> {
    let config = load("serial:\n  device: /dev/ttyS0\ncommands: [\"Grid Frequency\"]\n")?;
    let catalog = config.catalog()?;
    assert!(config.commands(&catalog).is_err());
    Ok(())
}

#[test]
fn extra_commands() -> Result<()> {
    let config = load(
        r#"
serial:
  device: /dev/ttyS0
extra_commands:
  - { code: "0x1310", name: "Custom", kind: scaled, divisor: 10, unit: "V" }
  - { code: "0050", name: "Model", kind: string, length: 12 }
commands: ["Custom", "Model"]
"#,
    )?;

    let catalog = config.catalog()?;
    assert_eq!(catalog.len(), 22);

    let custom = catalog.lookup(CommandCode::new(0x13, 0x10)).unwrap();
    assert_eq!(custom.name, "Custom");
    assert_eq!(custom.unit(), "V");
    assert_eq!(
        catalog.decode(CommandCode::new(0x13, 0x10), &[0x00, 0x64])?.value.as_f64(),
        Some(10.0)
    );

    assert_eq!(
        config.commands(&catalog)?,
        vec![CommandCode::new(0x13, 0x10), CommandCode::new(0x00, 0x50)]
    );

    Ok(())
}

#[test]
fn extra_kind_parses() -> Result<()> {
    let config: Config = serde_yaml::from_str(
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x0050\", name: M, kind: string, length: 3 }\n",
    )?;
    assert_eq!(config.extra_commands[0].kind, ExtraKind::String { length: 3 });
    assert_eq!(config.extra_commands[0].code, CommandCode::new(0x00, 0x50));
    Ok(())
}

#[test]
fn invalid_settings() {
    let bad = [
        "serial:\n  device: \"\"\n",
        "serial:\n  device: x\n  read_timeout_ms: 0\n",
        "serial:\n  device: x\n  write_timeout_ms: 0\n",
        "serial:\n  device: x\n  baud_rate: 0\n",
        "serial:\n  device: x\npoll_interval_secs: 0\n",
        "serial:\n  device: x\nmetrics:\n  listen: nowhere\n",
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x1310\", name: Z, kind: scaled, divisor: 0 }\n",
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x13\", name: Z, kind: scaled, divisor: 1 }\n",
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x1310\", name: Z, kind: string, length: 0 }\n",
        "poll_interval_secs: 5\n",
    ];
    for yaml in bad {
        assert!(Config::from_yaml(yaml).is_err(), "accepted {:?}", yaml);
    }
}

#[test]
fn colliding_extra_command() -> Result<()> {
    let config = load(
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x1009\", name: Again, kind: scaled, divisor: 1 }\n",
    )?;
    assert!(config.catalog().is_err());
    Ok(())
}

#[test]
fn retries_are_bounded() -> Result<()> {
    for retries in ["11", "4294967295"] {
        let yaml = format!("serial:\n  device: x\n  retries: {}\n", retries);
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("serial.retries"), "{}", err);
    }

    let config = load("serial:\n  device: x\n  retries: 10\n")?;
    assert_eq!(config.serial().retries(), 10);
    assert_eq!(SessionOptions::from(config.serial()).retries, 10);

    Ok(())
}

#[test]
fn extra_command_names_must_make_metric_names() -> Result<()> {
    for name in ["1st Value", "\"!!!\"", "\"  9 \""] {
        let yaml = format!(
            "serial:\n  device: x\nextra_commands:\n  - {{ code: \"0x1310\", name: {}, kind: scaled, divisor: 1 }}\n",
            name
        );
        assert!(Config::from_yaml(&yaml).is_err(), "accepted {:?}", name);
    }

    let config = load(
        "serial:\n  device: x\nextra_commands:\n  - { code: \"0x1310\", name: \"Value 1st\", kind: scaled, divisor: 1 }\n",
    )?;
    let catalog = config.catalog()?;
    assert_eq!(catalog.lookup(CommandCode::new(0x13, 0x10)).unwrap().metric_name(), "value_1st");

    Ok(())
}
