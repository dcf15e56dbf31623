//! Strictest-wins policy aggregation.
//!
//! Every effective-policy read is a pure reduction over the eligible admin
//! records for a user context, evaluated fresh on each call; no cached
//! aggregate is authoritative. The near-identical per-field merge loops of
//! the source system collapse into one reducer, [`reduce`], parameterized
//! by a participation predicate, a gating predicate, and a combiner. The
//! per-field wrappers pin the exact semantics:
//!
//! - numeric minimums: maximum across declaring admins, zero when none
//!   declares; the character-class counts additionally gate on the admin's
//!   own quality being at least `Complex`;
//! - quality: maximum by ordinal;
//! - `max_time_to_lock`, `max_failed_passwords_for_wipe`,
//!   `strong_auth_timeout`: minimum across participating admins, where a
//!   declared `0` means "does not participate" and is excluded from the
//!   minimum rather than flooring it;
//! - keyguard bitmask and boolean disable-flags: bitwise/logical OR.

use crate::identity::{AdminIdentity, UserId};
use crate::password::{PasswordQuality, PasswordRequirements};
use crate::policy::PolicyRecord;

/// One admin eligible to vote: identity plus the record half that is in
/// scope for the query (profile or parent).
pub type Eligible<'a> = (&'a AdminIdentity, &'a PolicyRecord);

/// The centralized reducer.
///
/// Folds `extract(record)` over every eligible record that passes both
/// `participates` and `gate`, combining with `combine`. Returns `None`
/// when no record participates, so callers can distinguish "no admin
/// declares this" from a declared value.
pub fn reduce<'a, T>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    participates: impl Fn(&PolicyRecord) -> bool,
    gate: impl Fn(&PolicyRecord) -> bool,
    extract: impl Fn(&PolicyRecord) -> T,
    combine: impl Fn(T, T) -> T,
) -> Option<T> {
    let mut acc: Option<T> = None;
    for (_, record) in eligible {
        if !participates(record) || !gate(record) {
            continue;
        }
        let value = extract(record);
        acc = Some(match acc {
            None => value,
            Some(prev) => combine(prev, value),
        });
    }
    acc
}

fn always(_: &PolicyRecord) -> bool {
    true
}

/// Maximum of a numeric minimum; zero when no admin declares it.
pub fn max_u32<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> u32,
) -> u32 {
    reduce(eligible, always, always, extract, u32::max).unwrap_or(0)
}

/// Maximum of a quality-gated numeric minimum: only admins whose own
/// quality is at least `Complex` are counted.
pub fn max_u32_complex_gated<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> u32,
) -> u32 {
    reduce(
        eligible,
        always,
        |r| r.password_quality.gates_complexity(),
        extract,
        u32::max,
    )
    .unwrap_or(0)
}

/// Maximum password quality by ordinal; `Unspecified` when none declares.
pub fn max_quality<'a>(eligible: impl IntoIterator<Item = Eligible<'a>>) -> PasswordQuality {
    reduce(
        eligible,
        always,
        always,
        |r| r.password_quality,
        PasswordQuality::max,
    )
    .unwrap_or(PasswordQuality::Unspecified)
}

/// Minimum over participating admins of a timeout-style field, where `0`
/// means "does not participate". Returns `0` when no admin participates.
pub fn min_nonzero_i64<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> i64,
) -> i64 {
    reduce(eligible, |r| extract(r) != 0, always, &extract, i64::min).unwrap_or(0)
}

/// Minimum over participating admins of a count-style field, where `0`
/// means "does not participate". Returns `0` when no admin participates.
pub fn min_nonzero_u32<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> u32,
) -> u32 {
    reduce(eligible, |r| extract(r) != 0, always, &extract, u32::min).unwrap_or(0)
}

/// Logical OR of a boolean disable-flag.
pub fn any_true<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> bool,
) -> bool {
    reduce(eligible, always, always, extract, |a, b| a || b).unwrap_or(false)
}

/// Bitwise OR of a bitmask field. Per-admin masking (the profile-to-parent
/// subset) is applied by the caller when it assembles the eligible set.
pub fn or_mask<'a>(
    eligible: impl IntoIterator<Item = Eligible<'a>>,
    extract: impl Fn(&PolicyRecord) -> u32,
) -> u32 {
    reduce(eligible, always, always, extract, |a, b| a | b).unwrap_or(0)
}

/// Aggregates the full password requirement set for an eligible admin set.
#[must_use]
pub fn password_requirements(eligible: &[Eligible<'_>]) -> PasswordRequirements {
    PasswordRequirements {
        quality: max_quality(eligible.iter().copied()),
        min_length: max_u32(eligible.iter().copied(), |r| r.min_password_length),
        min_letters: max_u32_complex_gated(eligible.iter().copied(), |r| r.min_password_letters),
        min_digits: max_u32_complex_gated(eligible.iter().copied(), |r| r.min_password_digits),
        min_symbols: max_u32_complex_gated(eligible.iter().copied(), |r| r.min_password_symbols),
        min_uppercase: max_u32_complex_gated(eligible.iter().copied(), |r| {
            r.min_password_uppercase
        }),
        min_lowercase: max_u32_complex_gated(eligible.iter().copied(), |r| {
            r.min_password_lowercase
        }),
        min_non_letter: max_u32_complex_gated(eligible.iter().copied(), |r| {
            r.min_password_non_letter
        }),
    }
}

/// Selects the strictest admin for wipe-on-failure.
///
/// The admin with the lowest non-zero `max_failed_passwords_for_wipe`
/// wins. On an exact tie the admin belonging to `primary_user` is
/// preferred; failing that, the earlier admin in iteration (insertion)
/// order keeps the slot. The primary-user preference applies only on
/// exact ties, an intentional quirk of the governing behavior that is
/// kept explicit here.
#[must_use]
pub fn strictest_wipe_admin<'a>(
    eligible: &[Eligible<'a>],
    primary_user: UserId,
) -> Option<Eligible<'a>> {
    let mut best: Option<Eligible<'a>> = None;
    for candidate in eligible {
        let (identity, record) = *candidate;
        if record.max_failed_passwords_for_wipe == 0 {
            continue;
        }
        match best {
            None => best = Some(*candidate),
            Some((best_id, best_record)) => {
                let count = record.max_failed_passwords_for_wipe;
                let best_count = best_record.max_failed_passwords_for_wipe;
                if count < best_count
                    || (count == best_count
                        && identity.user == primary_user
                        && best_id.user != primary_user)
                {
                    best = Some(*candidate);
                }
            },
        }
    }
    best
}
