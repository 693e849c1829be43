// Core modules implementing chunk sources, the CSV and JSON decoders, and error modeling.
pub mod cancel;
pub mod csv;
pub mod error;
pub mod json;
pub mod materialize;
pub mod metrics;
pub mod options;
pub mod policy;
pub mod source;
