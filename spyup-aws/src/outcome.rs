use std::io::{self, stdout};

use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use crate::{
    aws::{CreatedResource, Ec2Api},
    errors::{Error, Result},
};

/// Exit code of a completed run.
pub const EXIT_COMPLETED: i32 = 0;
/// Exit code of a hard failure (nothing was created).
pub const EXIT_FAILED: i32 = 1;
/// Exit code of a run that failed after creating resources.
pub const EXIT_PARTIALLY_FAILED: i32 = 2;
/// Exit code of a run the operator declined at a prompt.
pub const EXIT_ABORTED: i32 = 3;

/// Result of a workflow that did not fail before creating anything.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    /// The operator declined at a confirmation prompt.
    Aborted,
    /// A step failed after some resources had been created.
    PartiallyFailed(PartialFailure),
}

impl<T> Outcome<T> {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed(_) => EXIT_COMPLETED,
            Outcome::Aborted => EXIT_ABORTED,
            Outcome::PartiallyFailed(_) => EXIT_PARTIALLY_FAILED,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted)
    }
}

#[derive(Debug)]
pub struct PartialFailure {
    /// Name of the step that failed.
    pub step: String,
    pub error: Error,
    /// Resources created before the failure, in creation order.
    pub created: Vec<CreatedResource>,
    pub rollback: RollbackReport,
}

impl PartialFailure {
    /// Prints the failure and the commands to delete what is left.
    pub fn print(&self) -> io::Result<()> {
        execute!(
            stdout(),
            SetForegroundColor(Color::Red),
            Print(format!("\n\nFAILED at '{}': {}\n", self.step, self.error)),
            ResetColor
        )?;
        if self.rollback.attempted {
            println!(
                "rolled back {} of {} created resource(s)",
                self.rollback.deleted.len(),
                self.created.len()
            );
        }

        let remaining = self.rollback.remaining(&self.created);
        if remaining.is_empty() {
            return Ok(());
        }
        println!("\n# run the following to delete the remaining resources\n");
        for r in remaining.iter() {
            execute!(
                stdout(),
                SetForegroundColor(Color::Magenta),
                Print(format!("{}\n", r.delete_command())),
                ResetColor
            )?;
        }
        println!();
        Ok(())
    }
}

/// Records which created resources a rollback removed.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub attempted: bool,
    pub deleted: Vec<CreatedResource>,
    /// Resources whose deletion failed, with the error.
    pub failed: Vec<(CreatedResource, Error)>,
}

impl RollbackReport {
    /// Returns the created resources that still exist,
    /// in reverse creation order (the order to delete them in).
    pub fn remaining(&self, created: &[CreatedResource]) -> Vec<CreatedResource> {
        created
            .iter()
            .rev()
            .filter(|r| !self.deleted.contains(r))
            .cloned()
            .collect()
    }
}

/// Deletes the created resources in reverse creation order.
/// Keeps going on errors so that as much as possible is removed.
pub async fn rollback<E: Ec2Api>(ec2: &E, created: &[CreatedResource]) -> RollbackReport {
    let mut report = RollbackReport {
        attempted: true,
        ..RollbackReport::default()
    };
    for r in created.iter().rev() {
        match ec2.delete_resource(r).await {
            Ok(()) => {
                log::info!("rolled back {}", r);
                report.deleted.push(r.clone());
            }
            Err(e) => {
                log::warn!("failed to roll back {} ({})", r, e);
                report.failed.push((r.clone(), e));
            }
        }
    }
    report
}

/// Builds the partial failure, rolling back first if requested.
pub async fn fail<E: Ec2Api>(
    ec2: &E,
    step: &str,
    error: Error,
    created: Vec<CreatedResource>,
    rollback_on_failure: bool,
) -> PartialFailure {
    log::warn!(
        "step '{}' failed with {} resource(s) created ({})",
        step,
        created.len(),
        error
    );
    let rollback = if rollback_on_failure {
        rollback(ec2, &created).await
    } else {
        RollbackReport::default()
    };
    PartialFailure {
        step: step.to_string(),
        error,
        created,
        rollback,
    }
}

/// Stops a workflow at a failed step.
/// Fails hard if nothing was created yet.
pub async fn halt<E: Ec2Api, T>(
    ec2: &E,
    step: &str,
    error: Error,
    created: Vec<CreatedResource>,
    rollback_on_failure: bool,
) -> Result<Outcome<T>> {
    if created.is_empty() {
        log::warn!("step '{}' failed before anything was created", step);
        return Err(error);
    }
    let failure = fail(ec2, step, error, created, rollback_on_failure).await;
    Ok(Outcome::PartiallyFailed(failure))
}

#[test]
fn test_exit_code() {
    assert_eq!(Outcome::Completed(()).exit_code(), EXIT_COMPLETED);
    assert_eq!(Outcome::<()>::Aborted.exit_code(), EXIT_ABORTED);
    assert!(Outcome::<()>::Aborted.is_aborted());
}

#[test]
fn test_remaining() {
    let created = vec![
        CreatedResource::Vpc(String::from("vpc-1")),
        CreatedResource::Subnet(String::from("subnet-1")),
        CreatedResource::SecurityGroup(String::from("sg-1")),
    ];
    let report = RollbackReport {
        attempted: true,
        deleted: vec![CreatedResource::SecurityGroup(String::from("sg-1"))],
        failed: Vec::new(),
    };
    assert_eq!(
        report.remaining(&created),
        vec![
            CreatedResource::Subnet(String::from("subnet-1")),
            CreatedResource::Vpc(String::from("vpc-1")),
        ]
    );
    assert_eq!(RollbackReport::default().remaining(&created).len(), 3);
}
