use std::env;
use std::sync::OnceLock;

static IRFOLD_PASS_STATS: OnceLock<bool> = OnceLock::new();
static IRFOLD_FLUSH_DENORMALS: OnceLock<Option<bool>> = OnceLock::new();
static IRFOLD_FOLD_MAX_ELEMENTS: OnceLock<Option<usize>> = OnceLock::new();
static IRFOLD_FIXED_POINT_ITERS: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(key: &str) -> Option<bool> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

fn read_usize(key: &str) -> Option<usize> {
    let value = env::var(key).ok()?;
    match value.trim().parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring {key}={value:?}: expected a non-negative integer");
            None
        }
    }
}

pub(crate) fn pass_stats_enabled() -> bool {
    *IRFOLD_PASS_STATS.get_or_init(|| read_bool("IRFOLD_PASS_STATS").unwrap_or(false))
}

pub(crate) fn flush_denormals_override() -> Option<bool> {
    *IRFOLD_FLUSH_DENORMALS.get_or_init(|| read_bool("IRFOLD_FLUSH_DENORMALS"))
}

pub(crate) fn fold_max_elements_override() -> Option<usize> {
    *IRFOLD_FOLD_MAX_ELEMENTS.get_or_init(|| read_usize("IRFOLD_FOLD_MAX_ELEMENTS"))
}

pub(crate) fn fixed_point_iters_override() -> Option<usize> {
    *IRFOLD_FIXED_POINT_ITERS.get_or_init(|| read_usize("IRFOLD_FIXED_POINT_ITERS"))
}
