use super::{AdapterError, OpenShiftAdapter};
use crate::client::{ExecWait, Labels};
use tracing::{debug, instrument};

impl OpenShiftAdapter {
    /// Run `command` in the first pod matching `labels`
    ///
    /// Output is collected for at most `wait_seconds`, or less if the command
    /// exits earlier.
    pub async fn exec(
        &self,
        labels: &Labels,
        wait_seconds: u64,
        command: &[&str],
    ) -> Result<String, AdapterError> {
        self.exec_with(labels, ExecWait::seconds(wait_seconds), command)
            .await
    }

    /// Run `command` in the first pod matching `labels` with an explicit wait policy
    #[instrument(skip(self, labels), fields(namespace = %self.config.namespace))]
    pub async fn exec_with(
        &self,
        labels: &Labels,
        wait: ExecWait,
        command: &[&str],
    ) -> Result<String, AdapterError> {
        let ns = &self.config.namespace;

        let pods = self.client.list_pods(ns, labels).await?;
        let pod = pods
            .iter()
            .find_map(|p| p.metadata.name.as_deref())
            .ok_or_else(|| AdapterError::no_such("pod", format!("with labels {labels:?}")))?;

        debug!(namespace = %ns, pod = %pod, command = ?command, wait = ?wait, "Executing command");

        let argv = command.iter().map(|s| (*s).to_string()).collect();
        let output = self.client.exec(ns, pod, argv, wait).await?;
        Ok(output)
    }
}
