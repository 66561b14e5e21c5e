mod fixtures;
mod pipeline;
mod properties;
mod redaction;
mod snapshot_json;
