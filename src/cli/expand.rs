use crate::cli::CliError;
use crate::{Evaluator, QueryContext};

pub struct ExpandOptions {
    pub query: String,
    /// Configuration record as JSON; defaults apply when absent.
    pub context_json: Option<String>,
}

pub fn execute_expand(options: &ExpandOptions) -> Result<String, CliError> {
    let ctx: QueryContext = match &options.context_json {
        Some(json) => serde_json::from_str(json)?,
        None => QueryContext::default(),
    };
    Ok(Evaluator::new(ctx).expand(&options.query)?)
}
