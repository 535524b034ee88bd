/*
    Integration tests for the core_context subsystem

    Test suite covering:
    - CRDT merge convergence and conflict resolution
    - Multi-broker collaboration scenarios with clock progression
    - Persistence round trips through SQLite and the change log
*/

pub mod scenario_tests;
