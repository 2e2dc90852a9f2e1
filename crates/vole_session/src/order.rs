//! Pregenerated-session ordering.
//!
//! A subject works through the pregenerated sessions in a random order drawn
//! once and then resumed session-to-session via the saved settings.

use rand::seq::SliceRandom;
use serde_json::Value;

/// Number of pregenerated sessions shipped with the rig.
pub const PREGEN_SESSION_COUNT: usize = 12;

pub fn draw_session_order() -> Vec<usize> {
    let mut order: Vec<usize> = (0..PREGEN_SESSION_COUNT).collect();
    order.shuffle(&mut rand::thread_rng());
    order
}

/// Resume from the previous session's settings: reuse its order and advance
/// the index. Without usable history (or once the order is exhausted) a
/// fresh order starts at index 0.
pub fn resume_session_order(last_settings: Option<&Value>) -> (Vec<usize>, usize) {
    let resumed = last_settings.and_then(|settings| {
        let order: Vec<usize> =
            serde_json::from_value(settings.get("session_order")?.clone()).ok()?;
        let last_idx = settings.get("session_idx")?.as_u64()? as usize;
        Some((order, last_idx + 1))
    });
    match resumed {
        Some((order, idx)) if idx < order.len() => (order, idx),
        _ => (draw_session_order(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_is_a_permutation() {
        let order = draw_session_order();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..PREGEN_SESSION_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn no_history_draws_fresh() {
        let (order, idx) = resume_session_order(None);
        assert_eq!(order.len(), PREGEN_SESSION_COUNT);
        assert_eq!(idx, 0);
    }

    #[test]
    fn history_without_order_draws_fresh() {
        let settings = serde_json::json!({ "subject": "M001" });
        let (_, idx) = resume_session_order(Some(&settings));
        assert_eq!(idx, 0);
    }

    #[test]
    fn history_advances_the_index() {
        let settings = serde_json::json!({
            "session_order": [4, 1, 0, 2, 3, 5, 6, 7, 8, 9, 10, 11],
            "session_idx": 2,
        });
        let (order, idx) = resume_session_order(Some(&settings));
        assert_eq!(order[0], 4);
        assert_eq!(idx, 3);
    }

    #[test]
    fn exhausted_order_redraws() {
        let settings = serde_json::json!({
            "session_order": [0, 1],
            "session_idx": 1,
        });
        let (order, idx) = resume_session_order(Some(&settings));
        assert_eq!(order.len(), PREGEN_SESSION_COUNT);
        assert_eq!(idx, 0);
    }
}
