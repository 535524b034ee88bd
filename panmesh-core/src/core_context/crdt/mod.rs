/*
    CRDT subsystem - Conflict-free replication primitives

    State-based merge over whole entities, ordered by vector clocks.
*/

pub mod vector_clock;

pub use vector_clock::VectorClock;
