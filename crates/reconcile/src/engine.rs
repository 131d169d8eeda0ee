use ryoshu_core::{vendor_is_known, DraftRecord, InvoiceState, Provenance, ReconciledRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::normalize::{normalize_text, vendors_compatible};

/// Matching strategy that produced a group, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Same date and amount, vendors equal / blank / contained in one another.
    Fuzzy,
    /// Same date, amount and subject.
    Exact,
    /// Same amount, vendor and subject (date disagrees or is missing).
    Fallback,
    /// Nothing matched.
    Single,
}

impl MatchTier {
    pub const MERGING: [MatchTier; 3] = [MatchTier::Fuzzy, MatchTier::Exact, MatchTier::Fallback];

    pub fn group_prefix(self) -> &'static str {
        match self {
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::Exact => "exact",
            MatchTier::Fallback => "fallback",
            MatchTier::Single => "single",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            MatchTier::Fuzzy => "Fuzzy Match: date+amount+vendor",
            MatchTier::Exact => "Exact Match: date+amount+subject",
            MatchTier::Fallback => "Fallback Match: amount+vendor+subject",
            MatchTier::Single => "No Match",
        }
    }
}

/// Comparison keys computed once per draft.
#[derive(Debug, Clone)]
struct MatchKeys {
    date: String,
    amount: i64,
    vendor: String,
    subject: String,
}

impl MatchKeys {
    fn of(d: &DraftRecord) -> Self {
        let vendor = if vendor_is_known(&d.vendor) {
            normalize_text(&d.vendor)
        } else {
            String::new()
        };
        MatchKeys {
            date: d.date.trim().to_string(),
            amount: d.total_amount,
            vendor,
            subject: normalize_text(&d.subject),
        }
    }

    fn same_date_and_amount(&self, other: &Self) -> bool {
        !self.date.is_empty()
            && self.date == other.date
            && self.amount > 0
            && self.amount == other.amount
    }

    fn matches(&self, other: &Self, tier: MatchTier) -> bool {
        match tier {
            MatchTier::Fuzzy => {
                self.same_date_and_amount(other) && vendors_compatible(&self.vendor, &other.vendor)
            }
            MatchTier::Exact => {
                self.same_date_and_amount(other)
                    && !self.subject.is_empty()
                    && self.subject == other.subject
            }
            MatchTier::Fallback => {
                self.amount > 0
                    && self.amount == other.amount
                    && !self.vendor.is_empty()
                    && self.vendor == other.vendor
                    && !self.subject.is_empty()
                    && self.subject == other.subject
            }
            MatchTier::Single => false,
        }
    }
}

/// One partition cell: indices into the draft list plus the chosen representative.
#[derive(Debug, Clone, Serialize)]
pub struct MergeGroup {
    pub group_id: String,
    pub tier: MatchTier,
    pub members: Vec<usize>,
    pub representative: usize,
    pub representative_score: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub records: Vec<ReconciledRecord>,
    pub groups: Vec<MergeGroup>,
    /// Human-readable merge decisions, one line per multi-member group.
    pub log: Vec<String>,
}

/// Representative-selection weights.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub confirmed_invoice: i32,
    pub candidate_invoice: i32,
    pub date_present: i32,
    pub vendor_known: i32,
    pub amount_positive: i32,
    pub tax_rate_known: i32,
    pub payment_known: i32,
    pub per_missing_field: i32,
    pub needs_review: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confirmed_invoice: 30,
            candidate_invoice: 10,
            date_present: 20,
            vendor_known: 15,
            amount_positive: 15,
            tax_rate_known: 10,
            payment_known: 10,
            per_missing_field: -5,
            needs_review: -5,
        }
    }
}

/// Collapses redetections of the same physical receipt (whole-image pass plus
/// overlapping tile passes) into one record per receipt.
#[derive(Debug, Clone, Default)]
pub struct ReconcileEngine {
    pub weights: ScoreWeights,
}

impl ReconcileEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, d: &DraftRecord) -> i32 {
        let w = &self.weights;
        let mut score = 0;
        match &d.invoice {
            InvoiceState::Confirmed(_) => score += w.confirmed_invoice,
            InvoiceState::Candidate(_) => score += w.candidate_invoice,
            InvoiceState::None => {}
        }
        if !d.date.trim().is_empty() {
            score += w.date_present;
        }
        if vendor_is_known(&d.vendor) {
            score += w.vendor_known;
        }
        if d.total_amount > 0 {
            score += w.amount_positive;
        }
        if d.tax_rate.is_known() {
            score += w.tax_rate_known;
        }
        if d.payment_method.is_known() {
            score += w.payment_known;
        }
        score += w.per_missing_field * d.missing_fields().len() as i32;
        if d.needs_review() {
            score += w.needs_review;
        }
        score
    }

    /// Partition the drafts and emit one reconciled record per group.
    pub fn reconcile(&self, drafts: &[DraftRecord]) -> Reconciliation {
        let groups = self.partition(drafts);
        let mut out = Reconciliation::default();

        for group in groups {
            let record = self.merge(drafts, &group);
            if group.members.len() > 1 {
                let line = format!(
                    "[{}] {}: {} drafts ({}) -> representative {} (score {})",
                    group.group_id,
                    group.tier.reason(),
                    group.members.len(),
                    group
                        .members
                        .iter()
                        .map(|&i| drafts[i].segment_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    drafts[group.representative].segment_id,
                    group.representative_score,
                );
                debug!("{line}");
                out.log.push(line);
            }
            out.records.push(record);
            out.groups.push(group);
        }

        info!(
            drafts = drafts.len(),
            records = out.records.len(),
            "Reconciliation finished"
        );
        out
    }

    /// Ordered, exclusive partition: each tier only sees drafts no earlier
    /// tier claimed, and every draft lands in exactly one group.
    fn partition(&self, drafts: &[DraftRecord]) -> Vec<MergeGroup> {
        let keys: Vec<MatchKeys> = drafts.iter().map(MatchKeys::of).collect();
        let mut claimed = vec![false; drafts.len()];
        let mut groups = Vec::new();

        for tier in MatchTier::MERGING {
            let mut seq = 0;
            for seed in 0..drafts.len() {
                if claimed[seed] {
                    continue;
                }
                let mut members = vec![seed];
                for other in (seed + 1)..drafts.len() {
                    if !claimed[other] && keys[seed].matches(&keys[other], tier) {
                        members.push(other);
                    }
                }
                if members.len() < 2 {
                    continue;
                }
                for &m in &members {
                    claimed[m] = true;
                }
                groups.push(self.group(drafts, tier, seq, members));
                seq += 1;
            }
        }

        let mut seq = 0;
        for i in 0..drafts.len() {
            if !claimed[i] {
                claimed[i] = true;
                groups.push(self.group(drafts, MatchTier::Single, seq, vec![i]));
                seq += 1;
            }
        }

        groups
    }

    fn group(&self, drafts: &[DraftRecord], tier: MatchTier, seq: usize, members: Vec<usize>) -> MergeGroup {
        // Strict comparison keeps the first maximal member on ties.
        let mut representative = members[0];
        let mut best = self.score(&drafts[representative]);
        for &m in &members[1..] {
            let s = self.score(&drafts[m]);
            if s > best {
                best = s;
                representative = m;
            }
        }
        MergeGroup {
            group_id: format!("{}_{}", tier.group_prefix(), seq),
            tier,
            members,
            representative,
            representative_score: best,
        }
    }

    fn merge(&self, drafts: &[DraftRecord], group: &MergeGroup) -> ReconciledRecord {
        let mut rep = drafts[group.representative].clone();
        let members = || group.members.iter().map(|&i| &drafts[i]);

        if rep.invoice.confirmed().is_none() {
            if let Some(n) = members().find_map(|d| d.invoice.confirmed()) {
                rep.invoice = InvoiceState::Confirmed(n.clone());
            } else if rep.invoice.is_none() {
                if let Some(n) = members().find_map(|d| d.invoice.candidate()) {
                    rep.invoice = InvoiceState::Candidate(n.clone());
                }
            }
        }

        for d in members() {
            for flag in &d.review_flags {
                rep.flag(*flag);
            }
        }

        if rep.global_box.is_none() {
            rep.global_box = members().find_map(|d| d.global_box);
        }

        let provenance: Vec<Provenance> = members().map(Provenance::from).collect();
        ReconciledRecord::from_draft(
            rep,
            group.group_id.clone(),
            group.tier.reason().to_string(),
            provenance,
        )
    }
}
