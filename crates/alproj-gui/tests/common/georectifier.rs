//! A georectification library that plays back scripted behavior per stage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use alproj_gui::{Georectifier, GeorectifyError, JobContext, Stage, StageOutput, StageRequest};

/// How a stage behaves when the library is asked to compute it.
#[derive(Clone)]
pub enum Script {
    /// Returns the output immediately.
    Succeed(Value),
    /// Reports each fraction in turn, then returns the output.
    Progress { fractions: Vec<f64>, output: Value },
    /// Fails with the error built by the function.
    Fail(fn() -> GeorectifyError),
    /// Polls for cancellation until it is requested.
    UntilCancelled,
    /// Blocks until the gate is opened, then returns the output.
    Gated {
        gate: CancellationToken,
        output: Value,
    },
    /// Never returns and ignores cancellation.
    Hang,
}

/// Default output of a stage when nothing is scripted.
pub fn default_output(stage: Stage) -> Value {
    match stage {
        Stage::Matching => json!({ "gcpCount": 128, "plotPath": "/tmp/matches.png" }),
        Stage::Estimation => json!({ "rmse": 2.4, "params": { "fov": 58.2 } }),
        Stage::Export => json!({ "outputPath": "/tmp/out.tif" }),
        other => json!({ "stage": other.step_label() }),
    }
}

#[derive(Default)]
pub struct ScriptedGeorectifier {
    scripts: Mutex<HashMap<Stage, Script>>,
    calls: Mutex<Vec<StageRequest>>,
}

impl ScriptedGeorectifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the behavior of `stage` for every later call.
    pub fn script(&self, stage: Stage, script: Script) {
        self.scripts.lock().unwrap().insert(stage, script);
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<StageRequest> {
        self.calls.lock().unwrap().clone()
    }

    async fn play(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError> {
        self.calls.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.stage)
            .cloned()
            .unwrap_or_else(|| Script::Succeed(default_output(request.stage)));

        match script {
            Script::Succeed(output) => Ok(output),
            Script::Progress { fractions, output } => {
                for fraction in fractions {
                    if ctx.is_cancelled() {
                        return Err(GeorectifyError::Cancelled);
                    }
                    ctx.report(fraction, request.stage.step_label(), "working");
                    tokio::task::yield_now().await;
                }
                Ok(output)
            }
            Script::Fail(make) => Err(make()),
            Script::UntilCancelled => loop {
                if ctx.is_cancelled() {
                    return Err(GeorectifyError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Script::Gated { gate, output } => {
                gate.cancelled().await;
                Ok(output)
            }
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(Value::Null)
            }
        }
    }
}

#[async_trait]
impl Georectifier for ScriptedGeorectifier {
    async fn match_images(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError> {
        self.play(request, ctx).await
    }

    async fn estimate(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError> {
        self.play(request, ctx).await
    }

    async fn export(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError> {
        self.play(request, ctx).await
    }
}
