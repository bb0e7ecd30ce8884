//! Strategy cascade resolver.
//!
//! A logical intent ("the select-mode toggle", "the change-folder
//! action") is resolved by trying an ordered list of concrete
//! interaction strategies, most specific first. A strategy succeeds only
//! if its action lands AND its post-condition probe confirms the
//! intended effect; locating an element is necessary but not
//! sufficient, because a wrong-click on a hidden or unrelated control
//! would otherwise pass silently.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::backend::PageDriver;
use crate::errors::EngineError;
use crate::query::Query;

/// How a strategy interacts with the page.
#[derive(Debug, Clone)]
pub enum StrategyAction {
    /// Click the first match if any exists.
    ClickFirst(Query),
    /// Click only if a match is currently visible.
    ClickFirstVisible(Query),
    /// Open a menu, settle, then click an item inside it.
    OpenMenuThenClick { menu: Query, item: Query },
    /// Send a bare key press.
    PressKey(&'static str),
}

/// Post-condition that confirms the action had the intended effect.
#[derive(Debug, Clone)]
pub enum Probe {
    CountAtLeast { query: Query, min: usize },
    Visible(Query),
    Checked(Query),
    /// The action landed but this tenant variant exposes no observable
    /// state to confirm against. Accepted, flagged as unconfirmed.
    Tolerant,
}

#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: &'static str,
    pub action: StrategyAction,
    pub probe: Probe,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub strategy: &'static str,
    /// `false` when the winning strategy's probe was [`Probe::Tolerant`].
    pub confirmed: bool,
}

/// An ordered list of strategies for one logical intent.
#[derive(Debug, Clone)]
pub struct Cascade {
    intent: String,
    strategies: Vec<Strategy>,
    settle: Duration,
}

const MENU_SETTLE: Duration = Duration::from_millis(180);
const PROBE_SETTLE: Duration = Duration::from_millis(120);

impl Cascade {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            strategies: Vec::new(),
            settle: PROBE_SETTLE,
        }
    }

    pub fn strategy(mut self, name: &'static str, action: StrategyAction, probe: Probe) -> Self {
        self.strategies.push(Strategy {
            name,
            action,
            probe,
        });
        self
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// Try each strategy in order until one succeeds and its probe
    /// confirms. Exhaustion is a [`EngineError::ResolutionFailure`]; the
    /// caller is responsible for capturing a debug artifact before
    /// surfacing it.
    #[instrument(level = "debug", skip(self, driver), fields(intent = %self.intent))]
    pub async fn resolve(&self, driver: &dyn PageDriver) -> Result<Resolution, EngineError> {
        for strategy in &self.strategies {
            if !attempt(driver, &strategy.action).await {
                debug!(strategy = strategy.name, "strategy action did not land");
                continue;
            }

            tokio::time::sleep(self.settle).await;

            match &strategy.probe {
                Probe::Tolerant => {
                    warn!(
                        intent = %self.intent,
                        strategy = strategy.name,
                        "action landed but effect is not observable on this tenant; continuing unconfirmed"
                    );
                    return Ok(Resolution {
                        strategy: strategy.name,
                        confirmed: false,
                    });
                }
                probe => {
                    if check(driver, probe).await {
                        debug!(strategy = strategy.name, "strategy confirmed");
                        return Ok(Resolution {
                            strategy: strategy.name,
                            confirmed: true,
                        });
                    }
                    debug!(strategy = strategy.name, "post-condition not met, falling through");
                }
            }
        }

        Err(EngineError::ResolutionFailure(self.intent.clone()))
    }
}

/// Single-attempt action. Driver-level failures fold into `false` so the
/// cascade moves on to the next strategy instead of aborting.
async fn attempt(driver: &dyn PageDriver, action: &StrategyAction) -> bool {
    match action {
        StrategyAction::ClickFirst(query) => {
            if driver.count(query).await.unwrap_or(0) == 0 {
                return false;
            }
            driver.click(query).await.is_ok()
        }
        StrategyAction::ClickFirstVisible(query) => {
            if !driver.is_visible(query).await.unwrap_or(false) {
                return false;
            }
            driver.click(query).await.is_ok()
        }
        StrategyAction::OpenMenuThenClick { menu, item } => {
            if !driver.is_visible(menu).await.unwrap_or(false) {
                return false;
            }
            if driver.click(menu).await.is_err() {
                return false;
            }
            tokio::time::sleep(MENU_SETTLE).await;
            if !driver.is_visible(item).await.unwrap_or(false)
                && driver.count(item).await.unwrap_or(0) == 0
            {
                return false;
            }
            driver.click(item).await.is_ok()
        }
        StrategyAction::PressKey(key) => driver.press_key(key).await.is_ok(),
    }
}

async fn check(driver: &dyn PageDriver, probe: &Probe) -> bool {
    match probe {
        Probe::CountAtLeast { query, min } => driver.count(query).await.unwrap_or(0) >= *min,
        Probe::Visible(query) => driver.is_visible(query).await.unwrap_or(false),
        Probe::Checked(query) => driver.is_checked(query).await.unwrap_or(false),
        Probe::Tolerant => true,
    }
}
