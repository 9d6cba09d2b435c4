//! Test doubles for the cluster and process seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use host_fence::cluster::{Host, HostState, LcmState, VirtualMachine, VmState};
use host_fence::runner::RunError;
use host_fence::{ClusterApi, ClusterError, CommandOutput, CommandRunner};

/// A call made against [`FakeCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetHost(u32),
    MonitoringInterval,
    ListVms(String, bool),
    RefreshVm(u32),
    DeleteAndRecreate(u32),
    Delete(u32),
    Reschedule(u32),
    RecoverAsFailure(u32),
    RecoverAsRetry(u32),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::DeleteAndRecreate(_)
                | Self::Delete(_)
                | Self::Reschedule(_)
                | Self::RecoverAsFailure(_)
                | Self::RecoverAsRetry(_)
        )
    }
}

/// In-memory cluster that records every call with its (virtual) time.
pub struct FakeCluster {
    pub host: Host,
    pub interval: Duration,
    /// States returned by successive `get_host` calls. `None` fails the
    /// call. When exhausted, `host.state` is returned.
    host_states: Mutex<VecDeque<Option<HostState>>>,
    pub vms: Vec<VirtualMachine>,
    /// VM ids whose mutating calls fail.
    pub failing: HashSet<u32>,
    /// VM ids whose refresh fails.
    pub unrefreshable: HashSet<u32>,
    calls: Mutex<Vec<(Call, Instant)>>,
}

impl FakeCluster {
    pub fn new(host_id: u32, name: &str) -> Self {
        Self {
            host: Host {
                id: host_id,
                name: name.to_string(),
                state: HostState::Error,
                template: HashMap::new(),
            },
            interval: Duration::from_secs(60),
            host_states: Mutex::new(VecDeque::new()),
            vms: Vec::new(),
            failing: HashSet::new(),
            unrefreshable: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_lookups(self, states: Vec<Option<HostState>>) -> Self {
        *self.host_states.lock().unwrap() = states.into();
        self
    }

    pub fn with_vm(mut self, id: u32, state: VmState, lcm: LcmState, host: &str) -> Self {
        self.vms.push(VirtualMachine {
            id,
            name: format!("vm-{id}"),
            state,
            lcm_state: lcm,
            last_host: Some(host.to_string()),
        });
        self
    }

    pub fn failing(mut self, id: u32) -> Self {
        self.failing.insert(id);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Call, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((call, Instant::now()));
    }

    fn mutate(&self, call: Call, id: u32) -> Result<(), ClusterError> {
        self.record(call);
        if self.failing.contains(&id) {
            Err(ClusterError::Invalid {
                what: "VM",
                message: format!("injected failure for VM {id}"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_host(&self, id: u32) -> Result<Host, ClusterError> {
        self.record(Call::GetHost(id));

        let state = self
            .host_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Some(self.host.state));

        match state {
            Some(state) => Ok(Host {
                state,
                ..self.host.clone()
            }),
            None => Err(ClusterError::Timeout {
                program: "onehost".to_string(),
                secs: 120,
            }),
        }
    }

    async fn monitoring_interval(&self) -> Result<Duration, ClusterError> {
        self.record(Call::MonitoringInterval);
        Ok(self.interval)
    }

    async fn list_vms_last_seen_on(
        &self,
        host_name: &str,
        include_suspended: bool,
    ) -> Result<Vec<VirtualMachine>, ClusterError> {
        self.record(Call::ListVms(host_name.to_string(), include_suspended));
        Ok(self
            .vms
            .iter()
            .filter(|vm| vm.is_remediation_target(host_name, include_suspended))
            .cloned()
            .collect())
    }

    async fn refresh_vm(&self, id: u32) -> Result<VirtualMachine, ClusterError> {
        self.record(Call::RefreshVm(id));
        if self.unrefreshable.contains(&id) {
            return Err(ClusterError::Invalid {
                what: "VM",
                message: format!("VM {id} vanished"),
            });
        }
        self.vms
            .iter()
            .find(|vm| vm.id == id)
            .cloned()
            .ok_or_else(|| ClusterError::Invalid {
                what: "VM",
                message: format!("no VM {id}"),
            })
    }

    async fn delete_and_recreate(&self, id: u32) -> Result<(), ClusterError> {
        self.mutate(Call::DeleteAndRecreate(id), id)
    }

    async fn delete(&self, id: u32) -> Result<(), ClusterError> {
        self.mutate(Call::Delete(id), id)
    }

    async fn reschedule(&self, id: u32) -> Result<(), ClusterError> {
        self.mutate(Call::Reschedule(id), id)
    }

    async fn recover_as_failure(&self, id: u32) -> Result<(), ClusterError> {
        self.mutate(Call::RecoverAsFailure(id), id)
    }

    async fn recover_as_retry(&self, id: u32) -> Result<(), ClusterError> {
        self.mutate(Call::RecoverAsRetry(id), id)
    }
}

/// Runner that replays scripted outputs and records invocations.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<CommandOutput, String>>>,
    pub invocations: Mutex<Vec<(PathBuf, Vec<String>, Instant)>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<CommandOutput, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        self.invocations
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec(), Instant::now()));

        match self.script.lock().unwrap().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(RunError::Spawn(std::io::Error::other(message))),
            None => Ok(failed_fence()),
        }
    }
}

pub fn fenced() -> CommandOutput {
    CommandOutput {
        code: Some(255),
        stdout: "Rebooting machine @ IPMI:10.1.0.7...Done".to_string(),
        stderr: String::new(),
    }
}

pub fn failed_fence() -> CommandOutput {
    CommandOutput {
        code: Some(1),
        stdout: "Failed: Unable to obtain correct plug status or plug is not available".to_string(),
        stderr: "Connection timed out".to_string(),
    }
}

/// Base64 host record carrying IPMI credentials.
pub fn host_metadata(address: &str, user: &str, password: &str) -> String {
    let xml = format!(
        "<HOST><ID>7</ID><NAME>node07</NAME><TEMPLATE>\
         <IPMI_IP><![CDATA[{address}]]></IPMI_IP>\
         <IPMI_USER><![CDATA[{user}]]></IPMI_USER>\
         <IPMI_PASS><![CDATA[{password}]]></IPMI_PASS>\
         </TEMPLATE></HOST>"
    );
    base64::engine::general_purpose::STANDARD.encode(xml)
}

/// Base64 host record without IPMI attributes.
pub fn bare_host_metadata() -> String {
    base64::engine::general_purpose::STANDARD.encode("<HOST><ID>7</ID><TEMPLATE></TEMPLATE></HOST>")
}

/// A log event together with the fields of its enclosing spans.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Layer that records every event, for asserting on log output.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn find(&self, message: &str) -> Option<CapturedEvent> {
        self.events().into_iter().find(|e| e.message.contains(message))
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S> Layer<S> for CapturedEvents
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(fields) = span.extensions_mut().get_mut::<FieldMap>() {
                values.record(fields);
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_fields) = span.extensions().get::<FieldMap>() {
                    fields.0.extend(span_fields.0.clone());
                }
            }
        }
        event.record(&mut fields);

        let message = fields.0.remove("message").unwrap_or_default();
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields: fields.0,
        });
    }
}
