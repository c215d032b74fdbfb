//! Integration tests for revlay

mod test_fsm;
mod test_proxy;
mod test_release_store;
mod test_supervisor;
