pub mod chart_analyst;

pub use chart_analyst::ChartAnalyst;

/// A prompt persona sent to the model ahead of the user content.
pub trait Agent {
    fn name(&self) -> &str;
    fn system_prompt(&self) -> String;
}
