pub mod cache;
pub mod config;
pub mod data;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod harvest;
pub mod paginate;
pub mod record;
pub mod report;
pub mod sanitize;
pub mod sink;

pub use error::{RunError, SinkError};
pub use record::{FieldValue, Record};

pub fn print_banner() {
    let banner = r#"
  ______
 /_  __/________ __      __/ /__  _____
  / / / ___/ __ `/ | /| / / / _ \/ ___/
 / / / /  / /_/ /| |/ |/ / /  __/ /
/_/ /_/   \__,_/ |__/|__/_/\___/_/
    "#;
    println!("{}", banner);
    println!("  v{} - paginated fetch & extract\n", env!("CARGO_PKG_VERSION"));
}
