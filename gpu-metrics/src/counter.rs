//! Logical counters
//!
//! A logical counter turns the raw deltas of an [`Accumulator`] into a value
//! with a unit. Most counters are a single raw delta; derived ones are plain
//! functions over the deltas and the device parameters.
//!
//! [`Accumulator`]: crate::accumulator::Accumulator

use serde::Serialize;
use std::fmt;

use crate::catalog::DeviceParams;

/// Value storage of a counter once evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterStorage {
    Uint64,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterUnit {
    Ns,
    Cycles,
    Hz,
    Percent,
    Events,
    Pixels,
    Texels,
    Bytes,
    GBps,
}

impl fmt::Display for CounterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterUnit::Ns => "ns",
            CounterUnit::Cycles => "cycles",
            CounterUnit::Hz => "Hz",
            CounterUnit::Percent => "%",
            CounterUnit::Events => "events",
            CounterUnit::Pixels => "pixels",
            CounterUnit::Texels => "texels",
            CounterUnit::Bytes => "bytes",
            CounterUnit::GBps => "GB/s",
        };
        write!(f, "{}", s)
    }
}

/// How a counter is computed from the deltas.
#[derive(Debug, Clone, Copy)]
pub enum CounterEval {
    /// The delta at this index, unchanged
    Raw(usize),
    Uint64(fn(&DeviceParams, &[u64]) -> u64),
    Double(fn(&DeviceParams, &[u64]) -> f64),
}

/// Evaluated counter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CounterValue {
    Uint64(u64),
    Double(f64),
}

impl CounterValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            CounterValue::Uint64(v) => v as f64,
            CounterValue::Double(v) => v,
        }
    }
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterValue::Uint64(v) => write!(f, "{}", v),
            CounterValue::Double(v) => write!(f, "{:.2}", v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogicalCounter {
    pub symbol_name: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
    pub unit: CounterUnit,
    pub eval: CounterEval,
}

impl LogicalCounter {
    pub fn storage(&self) -> CounterStorage {
        match self.eval {
            CounterEval::Raw(_) | CounterEval::Uint64(_) => CounterStorage::Uint64,
            CounterEval::Double(_) => CounterStorage::Double,
        }
    }

    /// Computes the counter from accumulated deltas.
    ///
    /// A raw index past the end of `deltas` evaluates to zero.
    pub fn evaluate(&self, params: &DeviceParams, deltas: &[u64]) -> CounterValue {
        match self.eval {
            CounterEval::Raw(index) => CounterValue::Uint64(deltas.get(index).copied().unwrap_or(0)),
            CounterEval::Uint64(f) => CounterValue::Uint64(f(params, deltas)),
            CounterEval::Double(f) => CounterValue::Double(f(params, deltas)),
        }
    }
}
