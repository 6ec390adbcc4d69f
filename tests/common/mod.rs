#![allow(dead_code)]

pub use relayvisor_test_utils::{eventually, init_tracing, with_timeout};

use relayvisor::control::LogEntry;

/// Timeline texts, oldest first.
pub fn texts(entries: &[LogEntry]) -> Vec<String> {
    entries.iter().map(|e| e.text.clone()).collect()
}

/// Index of the first text containing `needle`.
pub fn position(texts: &[String], needle: &str) -> Option<usize> {
    texts.iter().position(|t| t.contains(needle))
}

/// Panic unless every needle appears, in order.
pub fn assert_in_order(texts: &[String], needles: &[&str]) {
    let mut from = 0;
    for needle in needles {
        match texts[from..].iter().position(|t| t.contains(needle)) {
            Some(idx) => from += idx + 1,
            None => panic!("expected '{needle}' after index {from} in timeline: {texts:#?}"),
        }
    }
}
