mod default_spec;
mod launch_spy;
mod provision_network;

use std::process;

use clap::{crate_version, Command};
use spyup_aws::outcome::{EXIT_COMPLETED, EXIT_FAILED};

const APP_NAME: &str = "spyup-aws";

/// Provisions an isolated network and launches a spy instance into it.
/// Each run creates new resources and a new state file.
#[tokio::main]
async fn main() {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Spy network and instance provisioning on AWS")
        .subcommands(vec![
            default_spec::command(),
            provision_network::command(),
            launch_spy::command(),
        ])
        .get_matches();

    let exit_code = match matches.subcommand() {
        Some((default_spec::NAME, sub_matches)) => {
            let opt = spyup_aws::DefaultSpecOption {
                log_level: sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),

                region: sub_matches
                    .get_one::<String>("REGION")
                    .unwrap_or(&String::from(spyup_aws::DEFAULT_REGION))
                    .clone(),
                availability_zone: sub_matches
                    .get_one::<String>("AVAILABILITY_ZONE")
                    .unwrap_or(&String::new())
                    .clone(),

                ports: sub_matches
                    .get_many::<i32>("INGRESS_PORTS")
                    .map(|v| v.copied().collect())
                    .unwrap_or_default(),
                ingress_cidrs: sub_matches
                    .get_many::<String>("INGRESS_CIDRS")
                    .map(|v| v.cloned().collect())
                    .unwrap_or_default(),
                peer_groups: sub_matches
                    .get_many::<String>("PEER_GROUPS")
                    .map(|v| v.cloned().collect())
                    .unwrap_or_default(),

                image_id: sub_matches
                    .get_one::<String>("IMAGE_ID")
                    .unwrap_or(&String::from(spyup_aws::DEFAULT_IMAGE_ID))
                    .clone(),
                instance_type: sub_matches
                    .get_one::<String>("INSTANCE_TYPE")
                    .unwrap_or(&String::from(spyup_aws::DEFAULT_INSTANCE_TYPE))
                    .clone(),
                key_name: sub_matches
                    .get_one::<String>("KEY_NAME")
                    .unwrap_or(&String::new())
                    .clone(),
                user_data_file: sub_matches
                    .get_one::<String>("USER_DATA_FILE")
                    .unwrap_or(&String::from(spyup_aws::DEFAULT_USER_DATA_FILE))
                    .clone(),
                volume_size_in_gb: *sub_matches
                    .get_one::<i32>("VOLUME_SIZE_IN_GB")
                    .unwrap_or(&30),
                interface_mode: sub_matches
                    .get_one::<String>("INTERFACE_MODE")
                    .unwrap_or(&String::from("attached"))
                    .clone(),

                state_dir: sub_matches
                    .get_one::<String>("STATE_DIR")
                    .unwrap_or(&String::from("."))
                    .clone(),
                spec_file_path: sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
            };
            default_spec::execute(opt)
                .await
                .map(|_| EXIT_COMPLETED)
        }

        Some((provision_network::NAME, sub_matches)) => {
            provision_network::execute(
                sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info")),
                sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap_or(&String::new()),
                sub_matches.get_flag("SKIP_PROMPT"),
                sub_matches.get_flag("SKIP_ROLLBACK"),
            )
            .await
        }

        Some((launch_spy::NAME, sub_matches)) => {
            launch_spy::execute(
                sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info")),
                sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap_or(&String::new()),
                sub_matches.get_flag("SKIP_PROMPT"),
                sub_matches.get_flag("SKIP_ROLLBACK"),
            )
            .await
        }

        _ => unreachable!("unknown subcommand"),
    };

    match exit_code {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("failed to execute: {}", e);
            eprintln!("failed to execute: {}", e);
            process::exit(EXIT_FAILED);
        }
    }
}
