// CLI command implementations

pub mod workflows;
