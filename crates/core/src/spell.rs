//! PDSI recursion and spell classification
//!
//! The severity index is computed month by month as an explicit state machine.
//! Alongside the running index X3, two incipient indices track a possible new
//! wet spell (X1 ≥ 0) and a possible new dry spell (X2 ≤ 0):
//!
//! ```text
//!  X1 = max(0, p_w·X1 + q_w·Z)        X2 = min(0, p_d·X2 + q_d·Z)
//!
//!  None ──X1 ≥ 0.5──► IncipientWet ──X1 ≥ 1──► EstablishedWet
//!   │  ◄──X1 = 0 / X2 ≤ −1───┘                       │
//!   │                                          Pe reaches 1
//!   └──X2 ≤ −0.5──► IncipientDry ──X2 ≤ −1──► EstablishedDry
//! ```
//!
//! Months whose final value depends on how an incipient spell or a spell
//! ending resolves are held in a bounded backtrack buffer and rewritten once
//! the outcome is known.
//!
//! # Scientific References
//! - Palmer, W.C. (1965). "Meteorological Drought". Research Paper 45
//! - Wells, N., Goddard, S., Hayes, M.J. (2004). "A Self-Calibrating Palmer
//!   Drought Severity Index". Journal of Climate, 17, 2335-2351

use crate::calibration::DurationFactors;
use crate::config::SpellConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Wet or dry side of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellSide {
    /// Positive PDSI
    Wet,
    /// Negative PDSI
    Dry,
}

impl SpellSide {
    /// +1 for wet, -1 for dry
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            SpellSide::Wet => 1.0,
            SpellSide::Dry => -1.0,
        }
    }

    /// The other side
    #[inline]
    pub fn opposite(self) -> SpellSide {
        match self {
            SpellSide::Wet => SpellSide::Dry,
            SpellSide::Dry => SpellSide::Wet,
        }
    }
}

impl fmt::Display for SpellSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpellSide::Wet => write!(f, "wet"),
            SpellSide::Dry => write!(f, "dry"),
        }
    }
}

/// Spell phase of the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellPhase {
    /// No spell in progress
    #[default]
    None,
    /// A wet spell may be starting
    IncipientWet,
    /// A wet spell is under way
    EstablishedWet,
    /// A dry spell may be starting
    IncipientDry,
    /// A dry spell (drought) is under way
    EstablishedDry,
}

impl SpellPhase {
    /// Incipient phase for a side
    pub fn incipient(side: SpellSide) -> Self {
        match side {
            SpellSide::Wet => SpellPhase::IncipientWet,
            SpellSide::Dry => SpellPhase::IncipientDry,
        }
    }

    /// Established phase for a side
    pub fn established(side: SpellSide) -> Self {
        match side {
            SpellSide::Wet => SpellPhase::EstablishedWet,
            SpellSide::Dry => SpellPhase::EstablishedDry,
        }
    }

    /// Side of the phase, `None` for [`SpellPhase::None`]
    pub fn side(self) -> Option<SpellSide> {
        match self {
            SpellPhase::None => None,
            SpellPhase::IncipientWet | SpellPhase::EstablishedWet => Some(SpellSide::Wet),
            SpellPhase::IncipientDry | SpellPhase::EstablishedDry => Some(SpellSide::Dry),
        }
    }

    /// Whether a spell has been established
    pub fn is_established(self) -> bool {
        matches!(self, SpellPhase::EstablishedWet | SpellPhase::EstablishedDry)
    }

    /// Stable lowercase name, used in exports
    pub fn as_str(self) -> &'static str {
        match self {
            SpellPhase::None => "none",
            SpellPhase::IncipientWet => "incipient_wet",
            SpellPhase::EstablishedWet => "established_wet",
            SpellPhase::IncipientDry => "incipient_dry",
            SpellPhase::EstablishedDry => "established_dry",
        }
    }
}

impl fmt::Display for SpellPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase change and the month it happened in
///
/// Several transitions can share a month (e.g. a sharp reversal passes
/// `EstablishedWet → None → IncipientDry → EstablishedDry` at once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellTransition {
    /// Month index
    pub month: usize,
    /// Phase before
    pub from: SpellPhase,
    /// Phase after
    pub to: SpellPhase,
}

/// Candidate values for a month whose final value is not yet known
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidates {
    wet: f64,
    dry: f64,
    continuation: f64,
}

/// Which candidate a buffered month is finalized with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Incipient(SpellSide),
    Continuation,
}

impl Candidates {
    fn pick(self, resolution: Resolution) -> f64 {
        match resolution {
            Resolution::Incipient(SpellSide::Wet) => self.wet,
            Resolution::Incipient(SpellSide::Dry) => self.dry,
            Resolution::Continuation => self.continuation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Provisional {
    month: usize,
    candidates: Candidates,
}

/// Result of running the recursion over a Z series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellRecord {
    /// Final PDSI per month
    pub pdsi: Vec<f64>,
    /// Phase at the end of each month
    pub phases: Vec<SpellPhase>,
    /// Every phase change, in order
    pub transitions: Vec<SpellTransition>,
    /// Phase after the last month
    pub terminal_phase: SpellPhase,
}

/// Month-by-month PDSI state
///
/// Thread it through the months with [`SpellTracker::step`] and call
/// [`SpellTracker::finish`] to resolve any months still held provisionally.
#[derive(Debug, Clone)]
pub struct SpellTracker {
    factors: DurationFactors,
    config: SpellConfig,
    phase: SpellPhase,
    /// X1
    wet_index: f64,
    /// X2
    dry_index: f64,
    /// X3
    severity: f64,
    /// V, accumulated effective moisture against an established spell
    effective_sum: f64,
    /// Pe
    ending_probability: f64,
    buffer: VecDeque<Provisional>,
    pdsi: Vec<f64>,
    phases: Vec<SpellPhase>,
    transitions: Vec<SpellTransition>,
}

impl SpellTracker {
    /// Start in phase `None` with all indices at zero
    pub fn new(factors: DurationFactors, config: &SpellConfig, capacity: usize) -> Self {
        Self {
            factors,
            config: config.clone(),
            phase: SpellPhase::None,
            wet_index: 0.0,
            dry_index: 0.0,
            severity: 0.0,
            effective_sum: 0.0,
            ending_probability: 0.0,
            buffer: VecDeque::new(),
            pdsi: Vec::with_capacity(capacity),
            phases: Vec::with_capacity(capacity),
            transitions: Vec::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SpellPhase {
        self.phase
    }

    /// Number of months currently held for backtracking
    pub fn pending_months(&self) -> usize {
        self.buffer.len()
    }

    /// Advance one month with anomaly `z`
    pub fn step(&mut self, z: f64) {
        let month = self.pdsi.len();
        self.pdsi.push(0.0);

        let wet_index = self.factors.wet.next(self.wet_index, z).max(0.0);
        let dry_index = self.factors.dry.next(self.dry_index, z).min(0.0);

        match self.phase {
            SpellPhase::None => {
                let continuation = self.factors.for_anomaly(z).next(self.severity, z);
                self.classify_from_none(
                    month,
                    Candidates {
                        wet: wet_index,
                        dry: dry_index,
                        continuation,
                    },
                );
            }
            SpellPhase::IncipientWet | SpellPhase::IncipientDry => {
                let continuation = self.factors.for_anomaly(z).next(self.severity, z);
                let side = if self.phase == SpellPhase::IncipientWet {
                    SpellSide::Wet
                } else {
                    SpellSide::Dry
                };
                self.step_incipient(
                    month,
                    side,
                    Candidates {
                        wet: wet_index,
                        dry: dry_index,
                        continuation,
                    },
                );
            }
            SpellPhase::EstablishedWet => {
                self.step_established(month, SpellSide::Wet, z, 0.0, dry_index);
            }
            SpellPhase::EstablishedDry => {
                self.step_established(month, SpellSide::Dry, z, wet_index, 0.0);
            }
        }

        self.phases.push(self.phase);
    }

    /// Resolve any buffered months with their provisional values
    pub fn finish(mut self) -> SpellRecord {
        self.flush(Resolution::Continuation);
        SpellRecord {
            pdsi: self.pdsi,
            phases: self.phases,
            transitions: self.transitions,
            terminal_phase: self.phase,
        }
    }

    fn transition(&mut self, month: usize, to: SpellPhase) {
        self.transitions.push(SpellTransition {
            month,
            from: self.phase,
            to,
        });
        self.phase = to;
    }

    fn flush(&mut self, resolution: Resolution) {
        for entry in self.buffer.drain(..) {
            self.pdsi[entry.month] = entry.candidates.pick(resolution);
        }
    }

    fn hold(&mut self, month: usize, candidates: Candidates) {
        self.buffer.push_back(Provisional { month, candidates });
    }

    fn enforce_backtrack_limit(&mut self) {
        while self.buffer.len() > self.config.max_backtrack_months {
            if let Some(oldest) = self.buffer.pop_front() {
                self.pdsi[oldest.month] = oldest.candidates.continuation;
            }
        }
    }

    fn classify_from_none(&mut self, month: usize, candidates: Candidates) {
        self.wet_index = candidates.wet;
        self.dry_index = candidates.dry;
        self.severity = candidates.continuation;

        let opening = self.config.incipient_threshold;
        let established = self.config.established_threshold;

        if candidates.wet >= opening {
            self.open(month, SpellSide::Wet, candidates);
            if candidates.wet >= established {
                self.establish(month, SpellSide::Wet, candidates.wet);
            }
        } else if candidates.dry <= -opening {
            self.open(month, SpellSide::Dry, candidates);
            if candidates.dry <= -established {
                self.establish(month, SpellSide::Dry, candidates.dry);
            }
        } else {
            self.pdsi[month] = candidates.continuation;
        }
    }

    fn open(&mut self, month: usize, side: SpellSide, candidates: Candidates) {
        self.transition(month, SpellPhase::incipient(side));
        self.buffer.clear();
        self.hold(month, candidates);
    }

    fn establish(&mut self, month: usize, side: SpellSide, value: f64) {
        self.flush(Resolution::Incipient(side));
        self.transition(month, SpellPhase::established(side));
        self.severity = value;
        self.wet_index = 0.0;
        self.dry_index = 0.0;
        self.effective_sum = 0.0;
        self.ending_probability = 0.0;
    }

    fn step_incipient(&mut self, month: usize, side: SpellSide, candidates: Candidates) {
        self.hold(month, candidates);

        let (same, opposite) = match side {
            SpellSide::Wet => (candidates.wet, -candidates.dry),
            SpellSide::Dry => (-candidates.dry, candidates.wet),
        };
        let established = self.config.established_threshold;

        if same >= established {
            self.establish(month, side, side.sign() * same);
        } else if same == 0.0 || opposite >= established {
            // Incipient spell fizzled: the month is re-evaluated from None
            // with the abandoned side's index cleared
            self.buffer.pop_back();
            self.flush(Resolution::Continuation);
            self.transition(month, SpellPhase::None);
            let candidates = match side {
                SpellSide::Wet => Candidates {
                    wet: 0.0,
                    ..candidates
                },
                SpellSide::Dry => Candidates {
                    dry: 0.0,
                    ..candidates
                },
            };
            self.classify_from_none(month, candidates);
        } else {
            self.wet_index = candidates.wet;
            self.dry_index = candidates.dry;
            self.severity = candidates.continuation;
            self.enforce_backtrack_limit();
        }
    }

    fn step_established(
        &mut self,
        month: usize,
        side: SpellSide,
        z: f64,
        wet_index: f64,
        dry_index: f64,
    ) {
        let factors = self.factors.for_side(side);
        let continuation = factors.next(self.severity, z);
        let sign = side.sign();
        let effective = z - sign * self.config.effective_offset;
        let opposes = sign * effective < 0.0;

        let candidates = Candidates {
            wet: wet_index,
            dry: dry_index,
            continuation,
        };

        if self.ending_probability == 0.0 && !opposes {
            self.pdsi[month] = continuation;
            self.settle(candidates);
            self.effective_sum = 0.0;
            return;
        }

        // Moisture needed this month to bring X3 to the opposite ending target
        let target = -sign * self.config.ending_target;
        let needed = (target - factors.p * self.severity) / factors.q;
        let remaining = needed + self.effective_sum;
        let effective_sum = self.effective_sum + effective;

        if sign * effective_sum >= 0.0 {
            // Ending aborted, the spell continues
            self.flush(Resolution::Continuation);
            self.pdsi[month] = continuation;
            self.settle(candidates);
            self.effective_sum = 0.0;
            self.ending_probability = 0.0;
            return;
        }

        let ending_probability = if sign * remaining < 0.0 {
            (effective_sum / remaining).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if ending_probability >= 1.0 {
            self.flush(Resolution::Incipient(side.opposite()));
            self.transition(month, SpellPhase::None);
            self.effective_sum = 0.0;
            self.ending_probability = 0.0;
            self.severity = 0.0;
            let seed = match side {
                SpellSide::Wet => dry_index,
                SpellSide::Dry => wet_index,
            };
            self.classify_from_none(
                month,
                Candidates {
                    continuation: seed,
                    ..candidates
                },
            );
        } else {
            self.hold(month, candidates);
            self.settle(candidates);
            self.effective_sum = effective_sum;
            self.ending_probability = ending_probability;
            self.enforce_backtrack_limit();
        }
    }

    fn settle(&mut self, candidates: Candidates) {
        self.wet_index = candidates.wet;
        self.dry_index = candidates.dry;
        self.severity = candidates.continuation;
    }
}

/// Run the recursion over a whole Z series
pub fn run_recursion(z: &[f64], factors: DurationFactors, config: &SpellConfig) -> SpellRecord {
    z.iter()
        .fold(
            SpellTracker::new(factors, config, z.len()),
            |mut tracker, &anomaly| {
                tracker.step(anomaly);
                tracker
            },
        )
        .finish()
}
