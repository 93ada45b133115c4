use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Uniformly random duration in [min, max]
pub fn random_duration<R: Rng>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rng.gen_range(0..=span))
}

// Random sign, +1.0 or -1.0
pub fn random_sign<R: Rng>(rng: &mut R) -> f32 {
    if rng.gen_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01 in epoch ms
        assert!(get_timestamp() > 1_577_836_800_000);
    }

    #[test]
    fn test_random_duration_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let min = Duration::from_secs(5);
        let max = Duration::from_secs(15);
        for _ in 0..200 {
            let d = random_duration(&mut rng, min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_duration(&mut rng, max, min), max);
    }

    #[test]
    fn test_random_sign() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let s = random_sign(&mut rng);
            assert!(s == 1.0 || s == -1.0);
        }
    }
}
