use std::io;

use clap::{Arg, Command};
use crossterm::style::Color;
use spyup_aws::{
    aws,
    outcome::Outcome,
    prompt::{AutoApprove, Confirm, Prompt},
    provision::{self, NetworkOptions, Plan},
    state::FsRepository,
};

pub const NAME: &str = "provision-network";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Creates a VPC, subnet, internet gateway and security group for the spy")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .arg(
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The spec file to load")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("SKIP_PROMPT")
                .long("skip-prompt")
                .help("Skips prompt mode")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("SKIP_ROLLBACK")
                .long("skip-rollback")
                .help("Keeps the resources created by a failed run")
                .required(false)
                .num_args(0),
        )
}

/// Returns the process exit code of the run.
pub async fn execute(
    log_level: &str,
    spec_file_path: &str,
    skip_prompt: bool,
    skip_rollback: bool,
) -> io::Result<i32> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let spec = spyup_aws::Spec::load(spec_file_path)?;
    spec.validate()?;

    let mut opts = NetworkOptions::from(&spec);
    if skip_rollback {
        opts.rollback_on_failure = false;
    }

    let shared_config = aws::load(&spec.region).await?;
    let ec2 = aws::Ec2::new(&shared_config);
    let repo = FsRepository::new(&spec.state_dir);
    let confirm: Box<dyn Confirm> = if skip_prompt {
        Box::new(AutoApprove)
    } else {
        Box::new(Prompt)
    };

    let plan = Plan::generate();
    log::info!(
        "provisioning network '{}' with base address {}",
        plan.label,
        plan.base
    );
    let outcome = provision::provision(&ec2, confirm.as_ref(), &repo, &opts, &plan).await?;
    match &outcome {
        Outcome::Completed(state) => {
            spyup_aws::print_notice(
                Color::Green,
                &format!(
                    "\n\nprovisioned network '{}' (VPC {}, subnet {}, security group {})\n",
                    state.label, state.vpc_id, state.subnet_id, state.sg_id
                ),
            )?;
        }
        Outcome::Aborted => {
            println!("aborted, no resources were created");
        }
        Outcome::PartiallyFailed(failure) => failure.print()?,
    }

    Ok(outcome.exit_code())
}
