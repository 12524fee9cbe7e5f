use rand::seq::SliceRandom;
use rand::Rng;
use spacetimedb::Timestamp;
use std::collections::HashSet;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// Anything that can sit in a weighted pool.
pub trait Weighted {
    fn weight(&self) -> f64;
}

/// Weighted random selection.
///
/// Draws uniformly in `[0, total)` and subtracts weights in list order until the
/// running value is non-positive. Returns the pool's last element if float error
/// leaves the loop without a hit, and falls back to a uniform choice when no
/// entry has a positive weight.
pub fn weighted_pick<'a, T: Weighted, R: Rng + ?Sized>(pool: &'a [T], rng: &mut R) -> Option<&'a T> {
    if pool.is_empty() {
        return None;
    }

    let total: f64 = pool.iter().map(|e| e.weight()).filter(|w| *w > 0.0).sum();
    if total <= 0.0 || !total.is_finite() {
        return pool.choose(rng);
    }

    let mut roll = rng.gen_range(0.0..total);
    for item in pool {
        let weight = item.weight();
        if weight <= 0.0 {
            continue;
        }
        roll -= weight;
        if roll <= 0.0 {
            return Some(item);
        }
    }
    pool.last()
}

/// Like [`weighted_pick`], but skips entries whose key is already used while any
/// unused entry remains. Once every key is used, duplicates are allowed.
pub fn weighted_pick_excluding<'a, T, R, F>(
    pool: &'a [T],
    used: &HashSet<String>,
    key: F,
    rng: &mut R,
) -> Option<&'a T>
where
    T: Weighted,
    R: Rng + ?Sized,
    F: Fn(&T) -> String,
{
    let fresh: Vec<&'a T> = pool.iter().filter(|e| !used.contains(&key(e))).collect();
    if fresh.is_empty() {
        return weighted_pick(pool, rng);
    }

    // Pick over the filtered references, then map back to the pool slot
    let refs: Vec<RefWeight<'a, T>> = fresh.into_iter().map(RefWeight).collect();
    weighted_pick(&refs, rng).map(|r| r.0)
}

struct RefWeight<'a, T>(&'a T);

impl<T: Weighted> Weighted for RefWeight<'_, T> {
    fn weight(&self) -> f64 {
        self.0.weight()
    }
}

/// `now + secs`, or `None` when `secs` is zero.
pub fn deadline_after(now: Timestamp, secs: u64) -> Option<Timestamp> {
    if secs == 0 {
        None
    } else {
        Some(add_secs(now, secs))
    }
}

/// `now + secs` unconditionally, saturating at the end of the clock.
pub fn add_secs(now: Timestamp, secs: u64) -> Timestamp {
    let micros = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(MICROS_PER_SECOND);
    Timestamp::from_micros_since_unix_epoch(now.to_micros_since_unix_epoch().saturating_add(micros))
}

/// Strict "a is after b" on the microsecond clock.
pub fn is_after(a: Timestamp, b: Timestamp) -> bool {
    a.to_micros_since_unix_epoch() > b.to_micros_since_unix_epoch()
}

/// Whole UTC days since the unix epoch; the reroll counters reset when it changes.
pub fn day_index(now: Timestamp) -> i64 {
    now.to_micros_since_unix_epoch().div_euclid(MICROS_PER_DAY)
}

/// Seconds left until `deadline`, saturating at zero.
pub fn secs_until(now: Timestamp, deadline: Timestamp) -> u64 {
    let diff = deadline.to_micros_since_unix_epoch() - now.to_micros_since_unix_epoch();
    if diff <= 0 { 0 } else { (diff / MICROS_PER_SECOND) as u64 }
}

/// Formats a duration as "1h 5m 3s".
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Clone, Debug, PartialEq)]
    struct Row(&'static str, f64);

    impl Weighted for Row {
        fn weight(&self) -> f64 {
            self.1
        }
    }

    #[test]
    fn empty_pool_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool: Vec<Row> = Vec::new();
        assert!(weighted_pick(&pool, &mut rng).is_none());
    }

    #[test]
    fn frequencies_follow_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = vec![Row("a", 1.0), Row("b", 3.0), Row("c", 6.0)];
        let trials = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            let picked = weighted_pick(&pool, &mut rng).unwrap();
            let idx = pool.iter().position(|r| r == picked).unwrap();
            counts[idx] += 1;
        }
        let expected = [0.1, 0.3, 0.6];
        for (count, want) in counts.iter().zip(expected.iter()) {
            let freq = *count as f64 / trials as f64;
            assert!((freq - want).abs() < 0.01, "freq {} vs {}", freq, want);
        }
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(11);
        let pool = vec![Row("a", 0.0), Row("b", 0.0), Row("c", -2.0), Row("d", 0.0)];
        let trials = 40_000;
        let mut counts = [0usize; 4];
        for _ in 0..trials {
            let picked = weighted_pick(&pool, &mut rng).unwrap();
            counts[pool.iter().position(|r| r == picked).unwrap()] += 1;
        }
        for count in counts {
            let freq = count as f64 / trials as f64;
            assert!((freq - 0.25).abs() < 0.02, "freq {}", freq);
        }
    }

    #[test]
    fn zero_weight_entries_are_never_drawn_when_others_are_positive() {
        let mut rng = StdRng::seed_from_u64(3);
        let pool = vec![Row("never", 0.0), Row("always", 2.0)];
        for _ in 0..1_000 {
            assert_eq!(weighted_pick(&pool, &mut rng).unwrap().0, "always");
        }
    }

    #[test]
    fn exclusion_avoids_used_keys_until_exhausted() {
        let mut rng = StdRng::seed_from_u64(5);
        let pool = vec![Row("a", 100.0), Row("b", 1.0)];
        let mut used = HashSet::new();
        used.insert("a".to_string());
        for _ in 0..200 {
            let picked = weighted_pick_excluding(&pool, &used, |r| r.0.to_string(), &mut rng).unwrap();
            assert_eq!(picked.0, "b");
        }
        used.insert("b".to_string());
        assert!(weighted_pick_excluding(&pool, &used, |r| r.0.to_string(), &mut rng).is_some());
    }

    #[test]
    fn deadlines_and_days() {
        let now = Timestamp::from_micros_since_unix_epoch(MICROS_PER_DAY * 3 + 5);
        assert_eq!(deadline_after(now, 0), None);
        let later = deadline_after(now, 90).unwrap();
        assert_eq!(secs_until(now, later), 90);
        assert!(is_after(later, now));
        assert_eq!(day_index(now), 3);
        assert_eq!(day_index(add_secs(now, 86_400)), 4);
    }

    #[test]
    fn huge_durations_saturate() {
        let now = Timestamp::from_micros_since_unix_epoch(1_000);
        let end = add_secs(now, u64::MAX);
        assert_eq!(end.to_micros_since_unix_epoch(), i64::MAX);
        let far = deadline_after(now, (i64::MAX / MICROS_PER_SECOND) as u64 + 1).unwrap();
        assert!(is_after(far, now));
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3_723), "1h 2m 3s");
    }
}
