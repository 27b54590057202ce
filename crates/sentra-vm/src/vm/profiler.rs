//! Execution profiling
//!
//! Optional per-opcode instruction counts plus a few scheduler and native
//! call counters. Disabled by default; the VM only touches it when
//! enabled.

use crate::bytecode::Opcode;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct Profiler {
    enabled: bool,
    total_instructions: u64,
    /// Indexed by opcode byte
    counts: Box<[u64; 256]>,
    native_calls: u64,
    task_switches: u64,
}

/// Serializable snapshot of the profiler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub total_instructions: u64,
    pub native_calls: u64,
    pub task_switches: u64,
    /// Opcode name and count, most frequent first
    pub opcodes: Vec<(String, u64)>,
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            enabled: false,
            total_instructions: 0,
            counts: Box::new([0; 256]),
            native_calls: 0,
            task_switches: 0,
        }
    }

    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::new()
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset(&mut self) {
        self.total_instructions = 0;
        self.counts.fill(0);
        self.native_calls = 0;
        self.task_switches = 0;
    }

    #[inline]
    pub fn record_instruction(&mut self, opcode: Opcode) {
        if !self.enabled {
            return;
        }
        self.total_instructions += 1;
        self.counts[opcode as u8 as usize] += 1;
    }

    pub fn record_native_call(&mut self) {
        if self.enabled {
            self.native_calls += 1;
        }
    }

    pub fn record_task_switch(&mut self) {
        if self.enabled {
            self.task_switches += 1;
        }
    }

    pub fn total_instructions(&self) -> u64 {
        self.total_instructions
    }

    pub fn instruction_count(&self, opcode: Opcode) -> u64 {
        self.counts[opcode as u8 as usize]
    }

    pub fn native_calls(&self) -> u64 {
        self.native_calls
    }

    pub fn task_switches(&self) -> u64 {
        self.task_switches
    }

    pub fn summary(&self) -> ProfileSummary {
        let mut opcodes: Vec<(String, u64)> = Opcode::ALL
            .iter()
            .filter(|op| self.instruction_count(**op) > 0)
            .map(|op| (format!("{:?}", op), self.instruction_count(*op)))
            .collect();
        opcodes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ProfileSummary {
            total_instructions: self.total_instructions,
            native_calls: self.native_calls,
            task_switches: self.task_switches,
            opcodes,
        }
    }

    /// Summary as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.summary())
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        if !self.enabled {
            return "Profiling not enabled".to_string();
        }
        let summary = self.summary();
        let mut report = String::new();
        let _ = writeln!(
            report,
            "Total instructions executed: {}",
            summary.total_instructions
        );
        let _ = writeln!(report, "Native calls: {}", summary.native_calls);
        let _ = writeln!(report, "Task switches: {}\n", summary.task_switches);
        if summary.opcodes.is_empty() {
            report.push_str("No instructions recorded\n");
            return report;
        }
        report.push_str("Instruction counts by opcode:\n");
        for (name, count) in &summary.opcodes {
            let percentage = (*count as f64 / summary.total_instructions as f64) * 100.0;
            let _ = writeln!(report, "  {:<20} {:>10} ({:>6.2}%)", name, count, percentage);
        }
        report
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}
