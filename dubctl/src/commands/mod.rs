mod resolve;
mod run;

pub use resolve::ResolveArgs;
pub use run::RunArgs;
