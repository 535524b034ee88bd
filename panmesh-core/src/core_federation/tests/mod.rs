/*
    Integration tests for the core_federation subsystem

    Test suite covering:
    - Store-and-forward relays across chains of router instances
    - Trust lifecycle persistence through SQLite restarts
*/
