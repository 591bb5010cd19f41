//! Property-layer behaviour across both instrument tables.

use iv_sweep::hardware::mock::MockScpiTransport;
use iv_sweep::hardware::{
    current_source, nanovoltmeter, CurrentSource, Domain, Nanovoltmeter, PropertyDescriptor,
    PropertyValue,
};
use std::sync::Arc;

fn range_properties() -> Vec<(&'static PropertyDescriptor, f64, f64)> {
    current_source::PROPERTIES
        .iter()
        .chain(nanovoltmeter::PROPERTIES.iter())
        .copied()
        .chain(std::iter::once(&nanovoltmeter::VOLTAGE_RANGE))
        .filter_map(|desc| match desc.values {
            Domain::Range { min, max } => Some((desc, min, max)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_every_range_property_clamps_to_nearest_bound() {
    let properties = range_properties();
    assert!(properties.len() >= 7);

    for (desc, min, max) in properties {
        let span = (max - min).abs().max(1.0);
        let above = desc.validate(PropertyValue::Float(max + span)).unwrap();
        let below = desc.validate(PropertyValue::Float(min - span)).unwrap();
        assert_eq!(above.as_f64(), Some(max), "{} above", desc.name);
        assert_eq!(below.as_f64(), Some(min), "{} below", desc.name);

        // Boundary values pass unchanged.
        for bound in [min, max] {
            let kept = desc.validate(PropertyValue::Float(bound)).unwrap();
            assert_eq!(kept.as_f64(), Some(bound), "{} at {bound}", desc.name);
        }
    }
}

#[tokio::test]
async fn test_discrete_set_members_round_trip() {
    let mock = Arc::new(MockScpiTransport::new("GPIB::1"));
    let desc = &current_source::CURRENT_FILTER;
    let Domain::Set(members) = desc.values else {
        panic!("current_filter should be a discrete set");
    };

    for member in members {
        let written = desc.set(mock.as_ref(), *member).await.unwrap();
        assert_eq!(written.as_str(), Some(*member));
        let read = desc.get(mock.as_ref()).await.unwrap();
        assert_eq!(read.as_str(), Some(*member));
    }

    for rejected in ["on", "TRUE", "1", ""] {
        let err = desc.set(mock.as_ref(), rejected).await.unwrap_err();
        assert!(err.is_validation(), "{rejected:?} should be rejected");
    }
    assert_eq!(mock.writes().len(), members.len());
}

#[tokio::test]
async fn test_clamped_value_is_what_reaches_the_wire() {
    let mock = Arc::new(MockScpiTransport::new("GPIB::1"));
    let source = CurrentSource::new(mock.clone());
    assert_eq!(source.set_compliance_voltage(150.0).await.unwrap(), 105.0);
    assert_eq!(mock.writes(), vec!["CURRent:COMPliance 105"]);
    assert_eq!(source.compliance_voltage().await.unwrap(), 105.0);
}

#[tokio::test]
async fn test_meter_averages_readings() {
    let mock = Arc::new(MockScpiTransport::new("GPIB::25"));
    let readings = Arc::new(std::sync::Mutex::new(
        vec!["1.0E-3", "3.0E-3", "+2.0E-03"].into_iter(),
    ));
    mock.set_responder(
        "READ",
        Arc::new(move || {
            readings
                .lock()
                .unwrap()
                .next()
                .unwrap_or("0E0")
                .to_string()
        }),
    );
    let mut meter = Nanovoltmeter::new(mock.clone());
    let volts = meter.measure_voltage(3).await.unwrap();
    assert!((volts - 2.0e-3).abs() < 1e-15);
    assert_eq!(mock.queries(), vec!["READ?", "READ?", "READ?"]);
}

#[tokio::test]
async fn test_meter_rejects_reading_without_exponent() {
    let mock = Arc::new(MockScpiTransport::new("GPIB::25").with_register("READ", "0.0015"));
    let mut meter = Nanovoltmeter::new(mock);
    let err = meter.measure_voltage(1).await.unwrap_err();
    assert!(err.is_protocol());
}
