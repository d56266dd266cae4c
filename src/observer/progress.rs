/// Terminal progress display: a bar when the number of iterations is bounded, a
/// spinner otherwise
pub struct ProgressObserver {
    bar: Option<ProgressBar>,
    hidden: bool,
}

impl ProgressObserver {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self { Self { bar: None, hidden: false } }

    /// Keeps track of progress without drawing anything
    pub fn hidden() -> Self { Self { bar: None, hidden: true } }

    pub fn position(&self) -> Option<u64> { self.bar.as_ref().map(ProgressBar::position) }

    fn bar(&mut self, max_iteration: Option<usize>) -> &ProgressBar {
        let hidden = self.hidden;
        self.bar.get_or_insert_with(|| {
            let (bar, template) = match max_iteration {
                Some(n) => (ProgressBar::new(n as u64),
                            "[{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise}) {msg}"),
                None    => (ProgressBar::new_spinner(),
                            "[{elapsed_precise}] {spinner} iteration {pos} {msg}"),
            };
            if hidden { bar.set_draw_target(ProgressDrawTarget::hidden()) }
            let style = match max_iteration {
                Some(_) => ProgressStyle::default_bar(),
                None    => ProgressStyle::default_spinner(),
            };
            bar.set_style(style.template(template).unwrap_or_else(|_| ProgressStyle::default_bar()));
            bar
        })
    }
}

impl Observer for ProgressObserver {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        let bar = self.bar(state.max_iteration);
        bar.set_position(state.iteration as u64);
        if let Some(objective) = state.objective {
            bar.set_message(format!("objective {objective:.6e}"));
        }
        Ok(ControlSignal::Continue)
    }

    fn on_run_end(&mut self, state: &IterationState, outcome: Outcome) -> Result<()> {
        let bar = self.bar(state.max_iteration);
        bar.set_position(state.iteration as u64);
        bar.finish_with_message(format!("{outcome} after {} iterations", group_digits(state.iteration)));
        Ok(())
    }
}


// ----- Imports -----------------------------------------------------------------------------------------
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{Result, utils::group_digits};

use super::{ControlSignal, IterationState, Observer, Outcome};
