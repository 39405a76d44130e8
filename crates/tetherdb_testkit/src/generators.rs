//! Property-based test generators using proptest.

use crate::fixtures::{Beatmap, Difficulty, Ruleset};
use proptest::prelude::*;
use tetherdb_core::{EntityId, Link};

/// Strategy for generating entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityId::from_bytes)
}

/// Strategy for generating beatmap titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 &'!-]{1,40}").expect("Invalid regex")
}

/// Strategy for generating difficulty settings in the playable range.
pub fn difficulty_strategy() -> impl Strategy<Value = Difficulty> {
    (0.0f32..=10.0, 0.0f32..=10.0, 0.0f32..=10.0, 0.0f32..=10.0).prop_map(
        |(drain_rate, circle_size, overall_difficulty, approach_rate)| Difficulty {
            drain_rate,
            circle_size,
            overall_difficulty,
            approach_rate,
        },
    )
}

/// Strategy for generating rulesets.
pub fn ruleset_strategy() -> impl Strategy<Value = Ruleset> {
    (
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        any::<bool>(),
    )
        .prop_map(|(short_name, available)| Ruleset {
            short_name,
            available,
        })
}

/// Strategy for generating beatmaps linked to `ruleset`.
pub fn beatmap_strategy(ruleset: Link<Ruleset>) -> impl Strategy<Value = Beatmap> {
    (title_strategy(), difficulty_strategy(), any::<bool>()).prop_map(
        move |(title, difficulty, hidden)| Beatmap {
            ruleset,
            title,
            difficulty,
            hidden,
        },
    )
}
