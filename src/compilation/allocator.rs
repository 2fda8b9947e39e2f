//! Linear-scan register allocation with spilling (spec.md C5), following
//! Poletto & Sarkar: intervals are walked in order of increasing start: a
//! free machine register is handed out if one exists, otherwise the active
//! interval (already in a register) with the furthest-away end is evicted
//! to a stack slot if doing so helps the new interval, else the new
//! interval itself spills.

use std::collections::HashMap;

use crate::backend::abi::AVAILABLE_MREG_IDS;
use crate::compilation::liveness::LiveInterval;
use crate::error::CompileResult;
use crate::ir::Register;

/// Where a vreg ended up: a machine register id, or a stack-slot index
/// (units of 8 bytes below the frame pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    MachineRegister(u8),
    Spill(u32),
}

/// A monotone high-water stack-slot allocator with a freelist: slots are
/// only handed out past the current high-water mark, but a freed slot is
/// reused before bumping the mark again.
#[derive(Default)]
struct SpillSlotAllocator {
    high_water: u32,
    freelist: Vec<u32>,
}

impl SpillSlotAllocator {
    fn allocate(&mut self) -> u32 {
        if let Some(slot) = self.freelist.pop() {
            slot
        } else {
            let slot = self.high_water;
            self.high_water += 1;
            slot
        }
    }

    fn free(&mut self, slot: u32) {
        self.freelist.push(slot);
    }
}

/// The allocator's output: a location for every vreg, plus the stack-frame
/// size the spilled slots require.
pub struct RegisterSchedule<'p> {
    assignments: HashMap<&'p str, Location>,
    frame_slots: u32,
}

impl<'p> RegisterSchedule<'p> {
    pub fn location_for(&self, vreg: Register<'p>) -> Option<Location> {
        let name = vreg.virtual_name()?;
        self.assignments.get(name).copied()
    }

    /// Bytes of stack space the frame must reserve for spill slots (8 bytes
    /// each, System V alignment is the assigner's concern).
    pub fn frame_size_bytes(&self) -> u32 {
        self.frame_slots * 8
    }
}

struct Live<'p> {
    interval: LiveInterval<'p>,
    location: Location,
}

pub struct LinearScanRegisterAllocator;

impl LinearScanRegisterAllocator {
    pub fn allocate<'p>(intervals: &[LiveInterval<'p>]) -> CompileResult<RegisterSchedule<'p>> {
        let mut sorted = intervals.to_vec();
        sorted.sort_by_key(|iv| iv.start);

        let mut free_mregs: Vec<u8> = AVAILABLE_MREG_IDS.to_vec();
        let mut spill_alloc = SpillSlotAllocator::default();
        let mut assignments: HashMap<&'p str, Location> = HashMap::new();
        let mut live: Vec<Live<'p>> = Vec::new();

        for interval in sorted {
            Self::expire_old_intervals(&mut live, interval.start, &mut free_mregs, &mut spill_alloc);

            let name = interval
                .vreg
                .virtual_name()
                .expect("allocator only ever sees virtual registers");

            if let Some(mreg) = free_mregs.pop() {
                assignments.insert(name, Location::MachineRegister(mreg));
                live.push(Live {
                    interval,
                    location: Location::MachineRegister(mreg),
                });
                continue;
            }

            let victim_idx = live
                .iter()
                .enumerate()
                .filter(|(_, l)| matches!(l.location, Location::MachineRegister(_)))
                .max_by_key(|(_, l)| l.interval.end)
                .map(|(i, _)| i);

            match victim_idx {
                Some(i) if live[i].interval.end > interval.end => {
                    let victim = live.remove(i);
                    let mreg = match victim.location {
                        Location::MachineRegister(id) => id,
                        Location::Spill(_) => unreachable!("filtered to machine-register entries"),
                    };
                    let slot = spill_alloc.allocate();
                    let victim_name = victim
                        .interval
                        .vreg
                        .virtual_name()
                        .expect("allocator only ever sees virtual registers");
                    assignments.insert(victim_name, Location::Spill(slot));
                    live.push(Live {
                        interval: victim.interval,
                        location: Location::Spill(slot),
                    });

                    assignments.insert(name, Location::MachineRegister(mreg));
                    live.push(Live {
                        interval,
                        location: Location::MachineRegister(mreg),
                    });
                }
                _ => {
                    let slot = spill_alloc.allocate();
                    assignments.insert(name, Location::Spill(slot));
                    live.push(Live {
                        interval,
                        location: Location::Spill(slot),
                    });
                }
            }
        }

        Ok(RegisterSchedule {
            assignments,
            frame_slots: spill_alloc.high_water,
        })
    }

    fn expire_old_intervals(
        live: &mut Vec<Live<'_>>,
        current_start: usize,
        free_mregs: &mut Vec<u8>,
        spill_alloc: &mut SpillSlotAllocator,
    ) {
        let mut i = 0;
        while i < live.len() {
            if live[i].interval.end < current_start {
                let expired = live.remove(i);
                match expired.location {
                    Location::MachineRegister(id) => free_mregs.push(id),
                    Location::Spill(slot) => spill_alloc.free(slot),
                }
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Register, RegisterWidth, SignType};

    fn vreg(name: &str) -> Register<'_> {
        Register::virtual_reg(name)
    }

    #[test]
    fn disjoint_intervals_reuse_the_same_register() {
        let _ = (RegisterWidth::R64, SignType::Signed);
        let a = LiveInterval {
            vreg: vreg("a"),
            start: 0,
            end: 2,
            accessed_frequently: true,
        };
        let b = LiveInterval {
            vreg: vreg("b"),
            start: 3,
            end: 5,
            accessed_frequently: true,
        };
        let schedule = LinearScanRegisterAllocator::allocate(&[a, b]).unwrap();
        assert_eq!(schedule.location_for(vreg("a")), schedule.location_for(vreg("b")));
    }

    #[test]
    fn more_overlapping_intervals_than_registers_forces_a_spill() {
        let intervals: Vec<LiveInterval> = (0..(AVAILABLE_MREG_IDS.len() + 1))
            .map(|i| LiveInterval {
                vreg: Register::virtual_reg(Box::leak(format!("v{i}").into_boxed_str())),
                start: 0,
                end: 100,
                accessed_frequently: true,
            })
            .collect();
        let schedule = LinearScanRegisterAllocator::allocate(&intervals).unwrap();
        let spilled = intervals
            .iter()
            .filter(|iv| matches!(schedule.location_for(iv.vreg), Some(Location::Spill(_))))
            .count();
        assert_eq!(spilled, 1);
        assert!(schedule.frame_size_bytes() >= 8);
    }
}
