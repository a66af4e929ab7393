#[macro_use]
extern crate tracing;

pub mod core;
pub mod diff;
pub mod guest;
pub mod hooks;
pub mod image;
pub mod logger;
pub mod network;
pub mod stdio;
pub mod store;
pub mod subsys;
pub mod vm;
pub mod volume;

/// Obtain the full error chain.
pub trait VerboseError {
    fn verbose(&self) -> String;
}

impl<T> VerboseError for T
where
    T: std::error::Error,
{
    /// loops through the error chain and formats into a single string
    /// containing all the lower level errors
    fn verbose(&self) -> String {
        let mut msg = format!("{self}");
        let mut opt_source = self.source();
        while let Some(source) = opt_source {
            msg = format!("{msg}: {source}");
            opt_source = source.source();
        }
        msg
    }
}
