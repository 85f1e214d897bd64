use proptest::prelude::*;

/// Strategy for generating job ids
pub fn job_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,31}"
}

/// Strategy for generating message ids
pub fn message_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,36}"
}

/// Strategy for generating order amounts around a filter threshold
pub fn amount_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![0u32..10, 90u32..110, Just(u32::MAX)]
}

/// Strategy for generating circuit states
pub fn circuit_state_strategy() -> impl Strategy<Value = busroute::CircuitState> {
    prop_oneof![
        Just(busroute::CircuitState::Closed),
        Just(busroute::CircuitState::Open),
        Just(busroute::CircuitState::HalfOpen),
    ]
}
