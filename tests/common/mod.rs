#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use serde_json::{json, Map, Value};

use compset_rs::service::{GenerationRequest, RequestPurpose};
use compset_rs::{CompsetError, ObservationTable, TextGenerationService};

/// Twelve items in three interleaved profiles.
///
/// Item `i` belongs to profile `i % 3`, which is strong on `grip`,
/// `weight` or `price` respectively; `durability` is flat everywhere.
pub fn three_segment_records() -> Vec<Map<String, Value>> {
    let brands = ["Acme", "Borealis", "Cirrus", "Acme"];
    (0..12)
        .map(|i| {
            let profile = i % 3;
            let attribute = |j: usize| {
                let base = if j == profile { 9.0 } else { 1.0 };
                base + 0.1 * ((i + j) % 4) as f64
            };
            let record = json!({
                "product_id": format!("P{i:02}"),
                "brand": brands[i % brands.len()],
                "grip": attribute(0),
                "weight": attribute(1),
                "price": attribute(2),
                "durability": attribute(3),
                "sales": 100.0 * (i + 1) as f64,
            });
            match record {
                Value::Object(map) => map,
                _ => unreachable!(),
            }
        })
        .collect()
}

pub fn three_segment_table() -> ObservationTable {
    ObservationTable::from_records(&three_segment_records()).expect("fixture table")
}

/// Same items with `price` renamed to `value`, which changes the profiles.
pub fn renamed_attribute_table() -> ObservationTable {
    let records: Vec<Map<String, Value>> = three_segment_records()
        .into_iter()
        .map(|mut record| {
            if let Some(price) = record.remove("price") {
                record.insert("value".into(), price);
            }
            record
        })
        .collect();
    ObservationTable::from_records(&records).expect("renamed table")
}

/// Text-generation mock that counts calls per purpose.
///
/// Naming answers with one `Name k` per numbered characteristic line of the
/// prompt, or the line text itself when `echo_characteristics` is set; the
/// report answers with a fixed text. A gated service holds every naming call
/// until the test adds a permit.
#[derive(Default)]
pub struct CountingService {
    naming_calls: AtomicUsize,
    report_calls: AtomicUsize,
    fail_naming: bool,
    fail_report: bool,
    echo_characteristics: bool,
    naming_gate: Option<Arc<Semaphore>>,
    report_prompts: Mutex<Vec<String>>,
}

impl CountingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_naming() -> Arc<Self> {
        Arc::new(Self {
            fail_naming: true,
            ..Self::default()
        })
    }

    pub fn failing_report() -> Arc<Self> {
        Arc::new(Self {
            fail_report: true,
            ..Self::default()
        })
    }

    /// Naming calls wait for a permit on the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let service = Arc::new(Self {
            echo_characteristics: true,
            naming_gate: Some(Arc::clone(&gate)),
            ..Self::default()
        });
        (service, gate)
    }

    pub fn naming_calls(&self) -> usize {
        self.naming_calls.load(Ordering::SeqCst)
    }

    pub fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    pub fn report_prompts(&self) -> Vec<String> {
        self.report_prompts.lock().clone()
    }
}

fn numbered_lines(prompt: &str) -> Vec<&str> {
    prompt
        .lines()
        .filter_map(|line| {
            line.split_once(". ")
                .filter(|(num, _)| num.trim().parse::<usize>().is_ok())
                .map(|(_, text)| text)
        })
        .collect()
}

#[async_trait]
impl TextGenerationService for CountingService {
    async fn generate(&self, request: GenerationRequest) -> compset_rs::Result<String> {
        match request.purpose {
            RequestPurpose::Naming => {
                self.naming_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.naming_gate {
                    gate.acquire()
                        .await
                        .map_err(|_| CompsetError::naming_service("gate closed"))?
                        .forget();
                }
                if self.fail_naming {
                    return Err(CompsetError::naming_service("naming unavailable"));
                }
                let names = numbered_lines(&request.prompt)
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| match self.echo_characteristics {
                        true => format!("'{text}'"),
                        false => format!("'Name {}'", i + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("[{names}]"))
            }
            RequestPurpose::Report => {
                self.report_calls.fetch_add(1, Ordering::SeqCst);
                self.report_prompts.lock().push(request.prompt.clone());
                if self.fail_report {
                    return Err(CompsetError::report_service("report unavailable"));
                }
                Ok("## Segment Profile\nfine\n## Target Audience Analysis\nfine\n## Opportunity Analysis\nfine".to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "counting-mock"
    }
}
