//! # Mesh Control Plane Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # Master / follower scenarios over TCP loopback
//! └── benches/           # Criterion benchmarks of the write path
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mesh-tests
//! cargo test -p mesh-tests integration::failover
//! cargo bench -p mesh-tests
//! ```

pub mod integration;
