#[path = "core/applier.rs"]
pub mod applier;

#[path = "core/candidate.rs"]
pub mod candidate;

#[path = "core/frame.rs"]
pub mod frame;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/protocol.rs"]
pub mod protocol;

#[path = "core/round.rs"]
pub mod round;

#[path = "core/sampler.rs"]
pub mod sampler;

#[path = "core/scheduler.rs"]
pub mod scheduler;

#[path = "core/weights.rs"]
pub mod weights;
