//! Classroom decision policy.
//!
//! Pure functions of flexibility, obligation balance and trust; the
//! classroom agent feeds them from its own ledger.

use corridor_core::{
    Adjustment, AgentId, ExitKind, ObligationLedger, ShiftDirection, TrustScore, TrustTable,
};

/// Below this willingness a classroom does not offer.
pub const MIN_WILLINGNESS: f64 = 0.25;

/// Offers scoring at least this are acceptable.
pub const ACCEPT_THRESHOLD: f64 = 0.5;

const FACTOR_FLOOR: f64 = 0.5;
const FACTOR_CEILING: f64 = 1.5;
const BALANCE_WEIGHT: f64 = 0.1;

const SCORE_BASE: f64 = 0.2;
const SCORE_RELIEF: f64 = 0.3;
const SCORE_COST_PER_MINUTE: f64 = 0.06;
const SCORE_DEBT_WEIGHT: f64 = 0.05;

/// Share of the congested interval above which a large classroom staggers.
pub const STAGGER_SHARE: f64 = 0.3;

/// Attendance above which a classroom may stagger its exit.
pub const STAGGER_ATTENDANCE: u32 = 40;

const FULL_ROOM: u32 = 30;
const FAVOR_COST: f64 = 0.2;
const PRIORITY_WEIGHT: f64 = 0.1;
// a favor asked of a full room for an early exit
const TERMS_BASELINE: f64 = 0.5;

/// Scales willingness by the balance with the counter-party.
///
/// Owing (negative balance) raises the factor, being owed lowers it, unless
/// trust is high, in which case it never drops below 1.
#[must_use]
pub fn obligation_factor(balance: i64, trust: TrustScore) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let factor = (1.0 - BALANCE_WEIGHT * balance as f64).clamp(FACTOR_FLOOR, FACTOR_CEILING);
    if balance > 0 && trust.is_high() {
        factor.max(1.0)
    } else {
        factor
    }
}

/// `clamp(flexibility × obligation_factor, 0, 1)`.
#[must_use]
pub fn willingness(flexibility: f64, balance: i64, trust: TrustScore) -> f64 {
    (flexibility * obligation_factor(balance, trust)).clamp(0.0, 1.0)
}

/// `floor(max × willingness × trust)`, or 0 when willingness is too low.
#[must_use]
pub fn offer_magnitude(max_adjustment: u32, willingness: f64, trust: TrustScore) -> u32 {
    if willingness < MIN_WILLINGNESS {
        return 0;
    }
    let raw = (f64::from(max_adjustment) * willingness * trust.value()).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let magnitude = raw.max(0.0) as u32;
    magnitude.min(max_adjustment)
}

/// Acceptor's score for a shift of `magnitude` minutes.
#[must_use]
pub fn offer_score(trust: TrustScore, magnitude: u32, max_adjustment: u32, debt: u64) -> f64 {
    let relief = if max_adjustment == 0 {
        0.0
    } else {
        f64::from(magnitude) / f64::from(max_adjustment)
    };
    #[allow(clippy::cast_precision_loss)]
    let debt = debt as f64;
    trust.value() + SCORE_BASE + SCORE_RELIEF * relief
        - SCORE_COST_PER_MINUTE * f64::from(magnitude)
        - SCORE_DEBT_WEIGHT * debt
}

/// How a proposer releases its cohort: large classrooms holding a big share
/// of a congested interval stagger instead of holding everyone back.
#[must_use]
pub fn exit_kind(direction: ShiftDirection, attendance: u32, arrivals: u32) -> ExitKind {
    #[allow(clippy::cast_precision_loss)]
    let share = if arrivals == 0 {
        0.0
    } else {
        f64::from(attendance) / f64::from(arrivals)
    };
    if direction == ShiftDirection::Later
        && attendance > STAGGER_ATTENDANCE
        && share > STAGGER_SHARE
    {
        ExitKind::Staggered
    } else {
        ExitKind::plain(direction)
    }
}

/// What the terms of a shift add to the acceptor's score.
///
/// An early exit helps a full room most, a late one helps an acceptor that is
/// owed credits, and a staggered one helps anyone a little. Favors that
/// expect one back cost the acceptor; priority raises the rest. Terms never
/// score below an early-exit favor to a full room, which adds nothing.
#[must_use]
pub fn exit_bonus(adjustment: &Adjustment, acceptor_attendance: u32, acceptor_net: i64) -> f64 {
    let benefit = match adjustment.kind() {
        ExitKind::Early if acceptor_attendance > FULL_ROOM => 0.6,
        ExitKind::Early => 0.3,
        ExitKind::Late if acceptor_net > 0 => 0.5,
        ExitKind::Late => 0.1,
        ExitKind::Staggered => 0.4,
    };
    let cost = if adjustment.is_repayment() { 0.0 } else { FAVOR_COST };
    let terms = benefit - cost + PRIORITY_WEIGHT * f64::from(adjustment.priority());
    (terms - TERMS_BASELINE).max(0.0)
}

/// What the acceptor does with an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Take it as offered.
    Accept,
    /// Ask for this smaller magnitude instead.
    Counter(u32),
    /// Refuse.
    Reject,
}

/// Accept, counter once with the largest smaller acceptable magnitude, or reject.
///
/// `bonus` is what the shift's terms add to every magnitude's score.
#[must_use]
pub fn evaluate_offer(
    trust: TrustScore,
    magnitude: u32,
    max_adjustment: u32,
    debt: u64,
    bonus: f64,
    may_counter: bool,
) -> OfferDecision {
    let acceptable =
        |m: u32| offer_score(trust, m, max_adjustment, debt) + bonus >= ACCEPT_THRESHOLD;
    if magnitude > 0 && acceptable(magnitude) {
        return OfferDecision::Accept;
    }
    if may_counter {
        if let Some(counter) = (1..magnitude).rev().find(|m| acceptable(*m)) {
            return OfferDecision::Counter(counter);
        }
    }
    OfferDecision::Reject
}

/// Proposer's answer to a counter-offer: the smaller of the two magnitudes.
#[must_use]
pub fn settle_counter(original: u32, counter: u32) -> Option<u32> {
    let settled = original.min(counter);
    (settled > 0).then_some(settled)
}

/// The peer this agent owes most, then the most trusted, then the lowest id.
#[must_use]
pub fn choose_counterparty<'a>(
    peers: impl IntoIterator<Item = &'a AgentId>,
    ledger: &ObligationLedger,
    trust: &TrustTable,
) -> Option<&'a AgentId> {
    peers.into_iter().min_by(|a, b| {
        ledger
            .balance(a)
            .cmp(&ledger.balance(b))
            .then_with(|| trust.get(b).value().total_cmp(&trust.get(a).value()))
            .then_with(|| a.cmp(b))
    })
}
