pub mod blockchain;
pub mod bls;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod formatting;
pub mod protocols;

fn _version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
fn _pkg_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

pub fn version() -> String {
    format!("{}: {}", _pkg_name(), _version())
}
