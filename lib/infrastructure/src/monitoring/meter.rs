use cached::proc_macro::cached;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge},
};

const METER_NAME: &str = "relay_hub";

/// Adds one to the counter `name`.
pub fn increment(name: &'static str, labels: &[(&str, &str)]) {
    counter(name).add(1, &attributes(labels));
}

/// Records the current value of the gauge `name`.
pub fn set(name: &'static str, value: f64, labels: &[(&str, &str)]) {
    gauge(name).record(value, &attributes(labels));
}

fn attributes(labels: &[(&str, &str)]) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(key, value)| KeyValue::new(key.to_string(), value.to_string()))
        .collect()
}

//one instrument per name, a noop as long as no meter provider is installed
#[cached]
fn counter(name: &'static str) -> Counter<u64> {
    opentelemetry::global::meter(METER_NAME).u64_counter(name).build()
}

#[cached]
fn gauge(name: &'static str) -> Gauge<f64> {
    opentelemetry::global::meter(METER_NAME).f64_gauge(name).build()
}
