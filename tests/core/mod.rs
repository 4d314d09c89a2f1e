mod common;

mod data_group_eviction_tests;
mod lazy_caching_tests;
mod prefetch_init_tests;
mod restart_background_update_tests;
mod unhashed_expiry_tests;
mod update_isolation_tests;
