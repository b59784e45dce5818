//! Built-in pipeline for an SO-101 leader/follower arm pair.
//!
//! Each stage delegates to one LeRobot (or Hugging Face Hub) command-line
//! tool. Robot motion only happens inside those tools.
//!
//! Optional stages (`diagnose`, `replay`, `train`, `evaluate`) only run
//! when requested with `--include`.

use super::stage::{ArtifactSpec, StageSpec, StageTimeout};
use super::template::CommandTemplate;
use crate::precondition::Precondition;

/// Environment variable holding the follower arm's serial device.
pub const FOLLOWER_PORT_VAR: &str = "FOLLOWER_PORT";
/// Environment variable holding the leader arm's serial device.
pub const LEADER_PORT_VAR: &str = "LEADER_PORT";
/// Environment variable holding the Hugging Face account name.
pub const HF_USER_VAR: &str = "HF_USER";

const FOLLOWER_TYPE: &str = "so101_follower";
const LEADER_TYPE: &str = "so101_leader";
const DIAGNOSTIC_TOOL: &str = "wrist_roll_diagnostic.py";
const WRIST_ROLL_MOTOR_ID: u8 = 5;

fn env_set(var: &str) -> Precondition {
    Precondition::EnvSet {
        var: var.to_string(),
    }
}

fn device(var: &str) -> Precondition {
    Precondition::DevicePresent {
        var: var.to_string(),
    }
}

fn artifact(name: &str) -> Precondition {
    Precondition::Artifact {
        name: name.to_string(),
    }
}

fn command_available(program: &str) -> Precondition {
    Precondition::CommandAvailable {
        program: program.to_string(),
    }
}

fn follower_args() -> [String; 3] {
    [
        format!("--robot.type={FOLLOWER_TYPE}"),
        "--robot.port={follower_port}".to_string(),
        "--robot.id={follower_id}".to_string(),
    ]
}

fn leader_args() -> [String; 3] {
    [
        format!("--teleop.type={LEADER_TYPE}"),
        "--teleop.port={leader_port}".to_string(),
        "--teleop.id={leader_id}".to_string(),
    ]
}

/// Stage declarations of the SO-101 two-arm recording workflow.
pub fn so101_pipeline() -> Vec<StageSpec> {
    vec![
        StageSpec::new(
            "discover",
            1,
            CommandTemplate::new("lerobot-find-cameras").arg("opencv"),
        )
        .with_description("Confirm both arms and every camera are attached")
        .requires(command_available("lerobot-find-cameras"))
        .requires(env_set(FOLLOWER_PORT_VAR))
        .requires(env_set(LEADER_PORT_VAR))
        .requires(device(FOLLOWER_PORT_VAR))
        .requires(device(LEADER_PORT_VAR))
        .requires(Precondition::CamerasPresent)
        .with_timeout(StageTimeout::Fixed { seconds: 120 })
        .skippable(),
        StageSpec::new(
            "calibrate-follower",
            2,
            CommandTemplate::new("lerobot-calibrate").args(follower_args()),
        )
        .with_description("Calibrate the follower arm joint ranges")
        .requires(command_available("lerobot-calibrate"))
        .requires(env_set(FOLLOWER_PORT_VAR))
        .requires(device(FOLLOWER_PORT_VAR))
        .produces(ArtifactSpec::at(
            "follower-calibration",
            format!("{{calibration_dir}}/robots/{FOLLOWER_TYPE}/{{follower_id}}.json"),
        ))
        .interactive()
        .skippable(),
        StageSpec::new(
            "calibrate-leader",
            3,
            CommandTemplate::new("lerobot-calibrate").args(leader_args()),
        )
        .with_description("Calibrate the leader arm joint ranges")
        .requires(command_available("lerobot-calibrate"))
        .requires(env_set(LEADER_PORT_VAR))
        .requires(device(LEADER_PORT_VAR))
        .produces(ArtifactSpec::at(
            "leader-calibration",
            format!("{{calibration_dir}}/teleoperators/{LEADER_TYPE}/{{leader_id}}.json"),
        ))
        .interactive()
        .skippable(),
        StageSpec::new(
            "diagnose",
            4,
            CommandTemplate::new(DIAGNOSTIC_TOOL).args([
                "--port={follower_port}".to_string(),
                format!("--motor-id={WRIST_ROLL_MOTOR_ID}"),
            ]),
        )
        .with_description("Exercise the follower wrist-roll motor and report its registers")
        .requires(command_available(DIAGNOSTIC_TOOL))
        .requires(device(FOLLOWER_PORT_VAR))
        .requires(artifact("follower-calibration"))
        .with_timeout(StageTimeout::Fixed { seconds: 300 })
        .optional(),
        StageSpec::new(
            "teleoperate",
            5,
            CommandTemplate::new("lerobot-teleoperate")
                .args(follower_args())
                .arg("--robot.cameras={cameras}")
                .args(leader_args())
                .arg("--display_data=false")
                .arg("--teleop_time_s={teleop_seconds}"),
        )
        .with_description("Drive the follower from the leader to verify the setup")
        .requires(command_available("lerobot-teleoperate"))
        .requires(device(FOLLOWER_PORT_VAR))
        .requires(device(LEADER_PORT_VAR))
        .requires(Precondition::CamerasPresent)
        .requires(artifact("follower-calibration"))
        .requires(artifact("leader-calibration"))
        .with_timeout(StageTimeout::Teleoperation { margin_seconds: 30 })
        .skippable(),
        StageSpec::new(
            "record",
            6,
            CommandTemplate::new("lerobot-record")
                .args(follower_args())
                .arg("--robot.cameras={cameras}")
                .args(leader_args())
                .args([
                    "--display_data=false",
                    "--dataset.repo_id={repo_id}",
                    "--dataset.root={dataset_dir}",
                    "--dataset.num_episodes={episodes}",
                    "--dataset.episode_time_s={episode_seconds}",
                    "--dataset.reset_time_s={reset_seconds}",
                    "--dataset.single_task={task}",
                    "--dataset.push_to_hub=false",
                ]),
        )
        .with_description("Record teleoperated episodes into a local dataset")
        .requires(command_available("lerobot-record"))
        .requires(device(FOLLOWER_PORT_VAR))
        .requires(device(LEADER_PORT_VAR))
        .requires(Precondition::CamerasPresent)
        .requires(artifact("follower-calibration"))
        .requires(artifact("leader-calibration"))
        .produces(ArtifactSpec::at("dataset", "{dataset_dir}"))
        .with_timeout(StageTimeout::Recording {
            margin_seconds: 120,
        }),
        StageSpec::new(
            "upload",
            7,
            CommandTemplate::new("huggingface-cli").args([
                "upload",
                "{repo_id}",
                "{dataset_dir}",
                "--repo-type=dataset",
            ]),
        )
        .with_description("Upload the recorded dataset to the Hugging Face Hub")
        .requires(command_available("huggingface-cli"))
        .requires(env_set(HF_USER_VAR))
        .requires(artifact("dataset"))
        .produces(ArtifactSpec::logical("hub-dataset"))
        .with_timeout(StageTimeout::Fixed { seconds: 1800 }),
        StageSpec::new(
            "replay",
            8,
            CommandTemplate::new("lerobot-replay")
                .args(follower_args())
                .args([
                    "--dataset.repo_id={repo_id}",
                    "--dataset.root={dataset_dir}",
                    "--dataset.episode=0",
                ]),
        )
        .with_description("Replay the first recorded episode on the follower")
        .requires(command_available("lerobot-replay"))
        .requires(device(FOLLOWER_PORT_VAR))
        .requires(artifact("follower-calibration"))
        .requires(artifact("dataset"))
        .with_timeout(StageTimeout::Recording { margin_seconds: 60 })
        .optional(),
        StageSpec::new(
            "train",
            9,
            CommandTemplate::new("lerobot-train").args([
                "--policy.type={policy}",
                "--policy.device={device}",
                "--dataset.repo_id={repo_id}",
                "--batch_size={batch_size}",
                "--steps={steps}",
                "--output_dir={train_output_dir}",
                "--policy.push_to_hub=true",
                "--policy.repo_id={policy_repo_id}",
            ]),
        )
        .with_description("Train a policy on the uploaded dataset")
        .requires(command_available("lerobot-train"))
        .requires(artifact("hub-dataset"))
        .produces(ArtifactSpec::at(
            "policy",
            "{train_output_dir}/checkpoints/last/pretrained_model",
        ))
        .optional(),
        StageSpec::new(
            "evaluate",
            10,
            CommandTemplate::new("lerobot-eval").args([
                "--policy.path={train_output_dir}/checkpoints/last/pretrained_model",
                "--policy.device={device}",
                "--env.type={eval_env}",
                "--env.episode_length=200",
                "--eval.n_episodes=10",
                "--eval.batch_size=1",
            ]),
        )
        .with_description("Evaluate the last training checkpoint in simulation")
        .requires(command_available("lerobot-eval"))
        .requires(artifact("policy"))
        .optional(),
    ]
}
