//! Chip family tables
//!
//! Delta slot 0 is always the timestamp and slot 1 the GPU clock counter, so
//! the `A` counters of the render formats start at slot 2.

use oatrace_shared::utils::time::cycles_to_ns;

use crate::catalog::{ChipFamily, DeviceParams, MetricSetDef};
use crate::counter::{CounterEval, CounterUnit, LogicalCounter};
use crate::layout::{A24U40_A14U32_B8_C8, A32U40_A4U32_B8_C8, MPEC8U32_B8_C8, PEC64U64};

const fn raw(
    symbol_name: &'static str,
    name: &'static str,
    desc: &'static str,
    unit: CounterUnit,
    index: usize,
) -> LogicalCounter {
    LogicalCounter { symbol_name, name, desc, unit, eval: CounterEval::Raw(index) }
}

const fn uint(
    symbol_name: &'static str,
    name: &'static str,
    desc: &'static str,
    unit: CounterUnit,
    f: fn(&DeviceParams, &[u64]) -> u64,
) -> LogicalCounter {
    LogicalCounter { symbol_name, name, desc, unit, eval: CounterEval::Uint64(f) }
}

const fn double(
    symbol_name: &'static str,
    name: &'static str,
    desc: &'static str,
    unit: CounterUnit,
    f: fn(&DeviceParams, &[u64]) -> f64,
) -> LogicalCounter {
    LogicalCounter { symbol_name, name, desc, unit, eval: CounterEval::Double(f) }
}

// Equations

fn at(d: &[u64], index: usize) -> u64 {
    d.get(index).copied().unwrap_or(0)
}

fn percent(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 * 100.0 / den as f64
    }
}

fn gpu_time(p: &DeviceParams, d: &[u64]) -> u64 {
    cycles_to_ns(at(d, 0), p.timestamp_frequency)
}

fn avg_gpu_core_frequency(p: &DeviceParams, d: &[u64]) -> u64 {
    let ns = gpu_time(p, d);
    if ns == 0 {
        return 0;
    }
    (at(d, 1) as u128 * 1_000_000_000 / ns as u128) as u64
}

/// Share of GPU clocks where counter `N` ticked.
fn busy<const N: usize>(_: &DeviceParams, d: &[u64]) -> f64 {
    percent(at(d, N), at(d, 1))
}

/// Counter `N` averaged over every EU.
fn per_eu<const N: usize>(p: &DeviceParams, d: &[u64]) -> f64 {
    percent(at(d, N), at(d, 1).saturating_mul(p.eu_count as u64))
}

/// Counter `N` counts 64-byte cachelines.
fn cachelines<const N: usize>(_: &DeviceParams, d: &[u64]) -> u64 {
    at(d, N).saturating_mul(64)
}

fn throughput<const N: usize>(p: &DeviceParams, d: &[u64]) -> f64 {
    let ns = gpu_time(p, d);
    if ns == 0 {
        return 0.0;
    }
    // bytes per nanosecond is GB/s
    cachelines::<N>(p, d) as f64 / ns as f64
}

// Counters shared by every set

const GPU_TIME: LogicalCounter = uint(
    "GpuTime",
    "GPU Time Elapsed",
    "Time elapsed on the GPU during the measurement.",
    CounterUnit::Ns,
    gpu_time,
);

const GPU_CORE_CLOCKS: LogicalCounter = raw(
    "GpuCoreClocks",
    "GPU Core Clocks",
    "The total number of GPU core clocks elapsed during the measurement.",
    CounterUnit::Cycles,
    1,
);

const AVG_GPU_CORE_FREQUENCY: LogicalCounter = uint(
    "AvgGpuCoreFrequency",
    "AVG GPU Core Frequency",
    "Average GPU Core Frequency in the measurement.",
    CounterUnit::Hz,
    avg_gpu_core_frequency,
);

const GPU_BUSY: LogicalCounter = double(
    "GpuBusy",
    "GPU Busy",
    "The percentage of time in which the GPU has been processing GPU commands.",
    CounterUnit::Percent,
    busy::<2>,
);

const EU_ACTIVE: LogicalCounter = double(
    "EuActive",
    "EU Active",
    "The percentage of time in which the Execution Units were actively processing.",
    CounterUnit::Percent,
    per_eu::<9>,
);

const EU_STALL: LogicalCounter = double(
    "EuStall",
    "EU Stall",
    "The percentage of time in which the Execution Units were stalled.",
    CounterUnit::Percent,
    per_eu::<10>,
);

const EU_FPU_BOTH_ACTIVE: LogicalCounter = double(
    "EuFpuBothActive",
    "EU Both FPU Pipes Active",
    "The percentage of time in which both EU FPU pipelines were actively processing.",
    CounterUnit::Percent,
    per_eu::<11>,
);

const EU_THREAD_OCCUPANCY: LogicalCounter = double(
    "EuThreadOccupancy",
    "EU Thread Occupancy",
    "The percentage of time in which hardware threads occupied EUs.",
    CounterUnit::Percent,
    per_eu::<15>,
);

const RASTERIZED_PIXELS: LogicalCounter = raw(
    "RasterizedPixels",
    "Rasterized Pixels",
    "The total number of rasterized pixels.",
    CounterUnit::Pixels,
    23,
);

const SAMPLER_TEXELS: LogicalCounter = raw(
    "SamplerTexels",
    "Sampler Texels",
    "The total number of texels seen on input (with 2x2 accuracy) in all sampler units.",
    CounterUnit::Texels,
    30,
);

// Tigerlake

static TGL_RENDER_BASIC: [LogicalCounter; 10] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    GPU_BUSY,
    EU_ACTIVE,
    EU_STALL,
    RASTERIZED_PIXELS,
    SAMPLER_TEXELS,
    double(
        "GtiReadThroughput",
        "GTI Read Throughput",
        "The total number of GPU memory bytes read from GTI.",
        CounterUnit::GBps,
        throughput::<38>,
    ),
    double(
        "GtiWriteThroughput",
        "GTI Write Throughput",
        "The total number of GPU memory bytes written to GTI.",
        CounterUnit::GBps,
        throughput::<39>,
    ),
];

static TGL_COMPUTE_BASIC: [LogicalCounter; 12] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    GPU_BUSY,
    EU_ACTIVE,
    EU_STALL,
    EU_FPU_BOTH_ACTIVE,
    EU_THREAD_OCCUPANCY,
    uint(
        "TypedBytesRead",
        "Typed Bytes Read",
        "The total number of typed memory bytes read via the Data Port.",
        CounterUnit::Bytes,
        cachelines::<40>,
    ),
    uint(
        "TypedBytesWritten",
        "Typed Bytes Written",
        "The total number of typed memory bytes written via the Data Port.",
        CounterUnit::Bytes,
        cachelines::<41>,
    ),
    double(
        "GtiReadThroughput",
        "GTI Read Throughput",
        "The total number of GPU memory bytes read from GTI.",
        CounterUnit::GBps,
        throughput::<38>,
    ),
    double(
        "GtiWriteThroughput",
        "GTI Write Throughput",
        "The total number of GPU memory bytes written to GTI.",
        CounterUnit::GBps,
        throughput::<39>,
    ),
];

static TGL_TEST_OA: [LogicalCounter; 7] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    raw("Counter0", "TestCounter0", "HW test counter 0.", CounterUnit::Events, 46),
    raw("Counter1", "TestCounter1", "HW test counter 1.", CounterUnit::Events, 47),
    raw("Counter2", "TestCounter2", "HW test counter 2.", CounterUnit::Events, 48),
    raw("Counter3", "TestCounter3", "HW test counter 3.", CounterUnit::Events, 49),
];

static TGL_METRIC_SETS: [MetricSetDef; 3] = [
    MetricSetDef {
        symbol_name: "RenderBasic",
        name: "Render Metrics Basic set",
        hw_config_uuid: "7bdafd88-a4fa-4ed5-bc09-1a977aa5be3e",
        layout: &A32U40_A4U32_B8_C8,
        counters: &TGL_RENDER_BASIC,
    },
    MetricSetDef {
        symbol_name: "ComputeBasic",
        name: "Compute Metrics Basic set",
        hw_config_uuid: "2e564b28-98fa-42a0-8bbc-7915de3cc03c",
        layout: &A32U40_A4U32_B8_C8,
        counters: &TGL_COMPUTE_BASIC,
    },
    MetricSetDef {
        symbol_name: "TestOa",
        name: "Metric set TestOa",
        hw_config_uuid: "a9ccc03d-a943-4e6b-9cd6-13e063075927",
        layout: &A32U40_A4U32_B8_C8,
        counters: &TGL_TEST_OA,
    },
];

// Alchemist and Meteorlake render share the A24u40 format where B starts at slot 40

static XEHP_RENDER_BASIC: [LogicalCounter; 10] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    GPU_BUSY,
    EU_ACTIVE,
    EU_STALL,
    RASTERIZED_PIXELS,
    SAMPLER_TEXELS,
    double(
        "GtiReadThroughput",
        "GTI Read Throughput",
        "The total number of GPU memory bytes read from GTI.",
        CounterUnit::GBps,
        throughput::<40>,
    ),
    double(
        "GtiWriteThroughput",
        "GTI Write Throughput",
        "The total number of GPU memory bytes written to GTI.",
        CounterUnit::GBps,
        throughput::<41>,
    ),
];

static XEHP_COMPUTE_BASIC: [LogicalCounter; 11] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    GPU_BUSY,
    EU_ACTIVE,
    EU_STALL,
    EU_FPU_BOTH_ACTIVE,
    EU_THREAD_OCCUPANCY,
    uint(
        "TypedBytesRead",
        "Typed Bytes Read",
        "The total number of typed memory bytes read via the Data Port.",
        CounterUnit::Bytes,
        cachelines::<42>,
    ),
    uint(
        "TypedBytesWritten",
        "Typed Bytes Written",
        "The total number of typed memory bytes written via the Data Port.",
        CounterUnit::Bytes,
        cachelines::<43>,
    ),
    double(
        "GtiReadThroughput",
        "GTI Read Throughput",
        "The total number of GPU memory bytes read from GTI.",
        CounterUnit::GBps,
        throughput::<40>,
    ),
];

static ACM_METRIC_SETS: [MetricSetDef; 2] = [
    MetricSetDef {
        symbol_name: "RenderBasic",
        name: "Render Metrics Basic set",
        hw_config_uuid: "0d07e2b6-4c4a-4ec4-a1d3-5e3b2a6f9c01",
        layout: &A24U40_A14U32_B8_C8,
        counters: &XEHP_RENDER_BASIC,
    },
    MetricSetDef {
        symbol_name: "ComputeBasic",
        name: "Compute Metrics Basic set",
        hw_config_uuid: "f8a4f0b1-52d6-4b1e-8f2c-0a6d8a3a74e2",
        layout: &A24U40_A14U32_B8_C8,
        counters: &XEHP_COMPUTE_BASIC,
    },
];

// Meteorlake media, MPEC counters start at slot 2

static MTL_MEDIA_SET1: [LogicalCounter; 7] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    double(
        "VdBoxBusy",
        "VDBox Busy",
        "The percentage of time in which the video decode engine was busy.",
        CounterUnit::Percent,
        busy::<2>,
    ),
    double(
        "VeBoxBusy",
        "VEBox Busy",
        "The percentage of time in which the video enhancement engine was busy.",
        CounterUnit::Percent,
        busy::<3>,
    ),
    double(
        "SfcBusy",
        "SFC Busy",
        "The percentage of time in which the scaler and format converter was busy.",
        CounterUnit::Percent,
        busy::<4>,
    ),
    uint(
        "MediaReadBytes",
        "Media Read Bytes",
        "The total number of bytes read by the media engines.",
        CounterUnit::Bytes,
        cachelines::<10>,
    ),
];

static MTL_METRIC_SETS: [MetricSetDef; 3] = [
    MetricSetDef {
        symbol_name: "RenderBasic",
        name: "Render Metrics Basic set",
        hw_config_uuid: "4c8d2f1e-9b7a-4e32-a5c6-1f0e9d8c7b6a",
        layout: &A24U40_A14U32_B8_C8,
        counters: &XEHP_RENDER_BASIC,
    },
    MetricSetDef {
        symbol_name: "ComputeBasic",
        name: "Compute Metrics Basic set",
        hw_config_uuid: "6a1b3c5d-7e9f-4a2b-8c4d-6e8f0a2b4c6d",
        layout: &A24U40_A14U32_B8_C8,
        counters: &XEHP_COMPUTE_BASIC,
    },
    MetricSetDef {
        symbol_name: "MediaSet1",
        name: "Media Set 1",
        hw_config_uuid: "d3e5f7a9-1b2c-4d6e-8f0a-2b4c6d8e0f1a",
        layout: &MPEC8U32_B8_C8,
        counters: &MTL_MEDIA_SET1,
    },
];

// Lunarlake, PEC counters start at slot 2

static LNL_COMPUTE_BASIC: [LogicalCounter; 8] = [
    GPU_TIME,
    GPU_CORE_CLOCKS,
    AVG_GPU_CORE_FREQUENCY,
    double(
        "XveActive",
        "XVE Active",
        "The percentage of time in which the vector engines were actively processing.",
        CounterUnit::Percent,
        per_eu::<2>,
    ),
    double(
        "XveStall",
        "XVE Stall",
        "The percentage of time in which the vector engines were stalled.",
        CounterUnit::Percent,
        per_eu::<3>,
    ),
    double(
        "XveThreadOccupancy",
        "XVE Thread Occupancy",
        "The percentage of time in which hardware threads occupied vector engines.",
        CounterUnit::Percent,
        per_eu::<4>,
    ),
    uint(
        "L3ReadBytes",
        "L3 Read Bytes",
        "The total number of bytes read from L3.",
        CounterUnit::Bytes,
        cachelines::<10>,
    ),
    double(
        "GtiReadThroughput",
        "GTI Read Throughput",
        "The total number of GPU memory bytes read from GTI.",
        CounterUnit::GBps,
        throughput::<18>,
    ),
];

static LNL_METRIC_SETS: [MetricSetDef; 1] = [MetricSetDef {
    symbol_name: "ComputeBasic",
    name: "Compute Metrics Basic set",
    hw_config_uuid: "b7c9d1e3-f5a7-4b9c-8d1e-3f5a7b9c1d3e",
    layout: &PEC64U64,
    counters: &LNL_COMPUTE_BASIC,
}];

pub(crate) static FAMILIES: [ChipFamily; 4] = [
    ChipFamily {
        name: "tgl",
        device_ids: &[0x9a40, 0x9a49, 0x9a60, 0x9a68, 0x9a70, 0x9a78],
        timestamp_shift: 0,
        metric_sets: &TGL_METRIC_SETS,
    },
    ChipFamily {
        name: "acm",
        device_ids: &[0x5690, 0x5691, 0x5692, 0x56a0, 0x56a1, 0x56a5, 0x56a6],
        timestamp_shift: 0,
        metric_sets: &ACM_METRIC_SETS,
    },
    ChipFamily {
        name: "mtl",
        device_ids: &[0x7d40, 0x7d45, 0x7d55, 0x7d60, 0x7dd5],
        timestamp_shift: 0,
        metric_sets: &MTL_METRIC_SETS,
    },
    ChipFamily {
        name: "lnl",
        device_ids: &[0x6420, 0x64a0, 0x64b0],
        timestamp_shift: 0,
        metric_sets: &LNL_METRIC_SETS,
    },
];
