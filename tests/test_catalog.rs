mod common;
use common::*;
use solivia_exporter::prelude::*;
use solivia_exporter::solivia::{CatalogError, CommandSchema, DecodeError, PayloadKind, Value};

use std::collections::HashSet;

fn custom(code: u16, schema: CommandSchema) -> Catalog {
    Catalog::with_entries([(CommandCode::from_u16(code), schema)]).unwrap()
}

#[test]
fn builtin_table() {
    let catalog = Catalog::builtin();
    assert_eq!(catalog.len(), 20);

    let codes: HashSet<_> = catalog.codes().collect();
    assert_eq!(codes.len(), 20);

    let names: HashSet<_> = catalog
        .codes()
        .map(|code| catalog.lookup(code).unwrap().name.to_string())
        .collect();
    assert_eq!(names.len(), 20);

    let day = catalog.lookup(CommandCode::new(0x13, 0x03)).unwrap();
    assert_eq!(day.name, "Day Wh");
    assert_eq!(day.unit(), "Wh");

    let fw = catalog.lookup(CommandCode::new(0x00, 0x40)).unwrap();
    assert_eq!(fw.kind, PayloadKind::FixedString(10));
    assert!(!fw.is_numeric());
}

#[test]
fn scaled_values() {
    let ten = custom(0x9001, CommandSchema::scaled("Tenths", 10, "A").unwrap());
    let one = custom(0x9001, CommandSchema::scaled("Units", 1, "W").unwrap());
    let code = CommandCode::from_u16(0x9001);

    let sample = ten.decode(code, &[0x00, 0x64]).unwrap();
    assert_eq!(sample.value, Value::Number(10.0));
    assert_eq!(sample.unit, "A");
    assert_eq!(sample.name, "Tenths");

    assert_eq!(one.decode(code, &[0x00, 0x64]).unwrap().value, Value::Number(100.0));
    assert_eq!(one.decode(code, &[0xFF, 0x9C]).unwrap().value, Value::Number(-100.0));
    assert_eq!(one.decode(code, &[0x00, 0x01, 0x00, 0x00]).unwrap().value, Value::Number(65536.0));
}

#[test]
fn scaled_rejects_odd_widths() {
    let catalog = Catalog::builtin();
    let code = CommandCode::new(0x10, 0x09);

    assert_eq!(
        catalog.decode(code, &[0x00, 0x01, 0x02]),
        Err(DecodeError::LengthMismatch {
            command: code,
            expected: "1, 2 or 4".to_string(),
            actual: 3,
        })
    );
    assert!(catalog.decode(code, &[]).is_err());
}

#[test]
fn fixed_strings() {
    let catalog = custom(0x9002, CommandSchema::fixed_string("Two", 2).unwrap());
    let code = CommandCode::from_u16(0x9002);

    let sample = catalog.decode(code, &[0x13, 0x03]).unwrap();
    assert_eq!(sample.value.as_str().unwrap().chars().count(), 2);
    assert_eq!(sample.unit, "");

    assert!(matches!(
        catalog.decode(code, &[0x13]),
        Err(DecodeError::LengthMismatch { actual: 1, .. })
    ));
}

#[test]
fn padded_identity_strings() {
    let catalog = Catalog::builtin();
    let sample = catalog
        .decode(CommandCode::new(0x00, 0x00), b"RPI M6\0\0\0")
        .unwrap();
    assert_eq!(sample.value, Value::Text("RPI M6".to_string()));
}

#[test]
fn unknown_command() {
    let catalog = Catalog::builtin();
    let code = CommandCode::new(0x99, 0x99);
    assert_eq!(catalog.decode(code, &[0x00]), Err(DecodeError::UnknownCommand(code)));
}

#[test]
fn extra_entries_are_validated() {
    assert_eq!(
        CommandSchema::scaled("Broken", 0, "V"),
        Err(CatalogError::ZeroDivisor("Broken".to_string()))
    );
    assert_eq!(
        CommandSchema::fixed_string("Empty", 0),
        Err(CatalogError::InvalidLength("Empty".to_string(), 0))
    );

    let clash = Catalog::with_entries([(
        CommandCode::new(0x10, 0x01),
        CommandSchema::scaled("Again", 1, "A").unwrap(),
    )]);
    assert_eq!(clash.unwrap_err(), CatalogError::DuplicateCode(CommandCode::new(0x10, 0x01)));

    let catalog = custom(0x1310, CommandSchema::scaled("Custom", 10, "V").unwrap());
    assert_eq!(catalog.len(), 21);
    assert_eq!(catalog.codes().last(), Some(CommandCode::new(0x13, 0x10)));
}

#[test]
fn find_by_name() {
    let catalog = Catalog::builtin();
    assert_eq!(catalog.find_by_name("AC Power"), Some(CommandCode::new(0x10, 0x09)));
    assert_eq!(catalog.find_by_name(" day wh "), Some(CommandCode::new(0x13, 0x03)));
    assert_eq!(catalog.find_by_name("Nothing"), None);
}

#[test]
fn command_code_text() {
    let code: CommandCode = "0x1303".parse().unwrap();
    assert_eq!(code, CommandCode::new(0x13, 0x03));
    assert_eq!("1303".parse::<CommandCode>().unwrap(), code);
    assert_eq!(code.to_string(), "1303");
    assert_eq!(format!("{:?}", code), "0x1303");
    assert!("13".parse::<CommandCode>().is_err());
    assert!("0xZZZZ".parse::<CommandCode>().is_err());
}

#[test]
fn factory_payloads_decode() {
    let catalog = Catalog::builtin();
    for code in catalog.codes() {
        let payload = Factory::payload_for(catalog.lookup(code).unwrap());
        assert!(catalog.decode(code, &payload).is_ok(), "{}", code);
    }
}
