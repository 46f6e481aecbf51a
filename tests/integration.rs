use std::{env, fs, path::PathBuf, process::Command};

fn run_bin(args: &[&str]) {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_viremia"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[model]\n"
        + "max_pop = 500\n"
        + "max_birth_prob = 0.1\n"
        + "clear_prob = 0.05\n"
        + "\n"
        + "[model.resistance]\n"
        + "mut_prob = 0.005\n"
        + "traits = { guttagonol = false, srinol = false }\n"
        + "\n"
        + "[init]\n"
        + "n_viruses = 50\n"
        + "\n"
        + "[treatment]\n"
        + "tracked_drugs = [\"guttagonol\"]\n"
        + "prescriptions = [ { step = 32, drug = \"guttagonol\" },]\n"
        + "\n"
        + "[output]\n"
        + "n_steps = 64\n"
        + "trials_per_file = 4\n"
        + "seed = 42\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]);

    let run_dir = test_dir.join("run-0000");
    assert!(run_dir.join("trajectories-0000.msgpack").is_file());
    assert!(run_dir.join("trajectories-0001.msgpack").is_file());
    assert!(run_dir.join("checkpoint.msgpack").is_file());

    // Both runs start from the same seed.
    assert_eq!(
        fs::read(run_dir.join("trajectories-0001.msgpack")).expect("failed to read trajectories"),
        fs::read(test_dir.join("run-0001").join("trajectories-0001.msgpack"))
            .expect("failed to read trajectories")
    );

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);
    assert!(run_dir.join("results.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!run_dir.exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_fails() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = String::new()
        + "[model]\n"
        + "max_pop = 0\n"
        + "max_birth_prob = 0.1\n"
        + "clear_prob = 0.05\n"
        + "\n"
        + "[init]\n"
        + "n_viruses = 10\n"
        + "\n"
        + "[output]\n"
        + "n_steps = 10\n"
        + "trials_per_file = 1\n";
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    let output = Command::new(env!("CARGO_BIN_EXE_viremia"))
        .args(["--sim-dir", test_dir.to_str().expect("invalid path"), "create"])
        .output()
        .expect("failed to execute command");

    assert!(!output.status.success());
    let stderr_str = String::from_utf8_lossy(&output.stderr);
    assert!(stderr_str.contains("invalid maximum population"), "{stderr_str}");
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn create_skips_existing_runs() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("create_skips_existing_runs");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = String::new()
        + "[model]\n"
        + "max_pop = 100\n"
        + "max_birth_prob = 0.1\n"
        + "clear_prob = 0.05\n"
        + "\n"
        + "[init]\n"
        + "n_viruses = 10\n"
        + "\n"
        + "[output]\n"
        + "n_steps = 16\n"
        + "trials_per_file = 2\n"
        + "seed = 3\n";
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    // Only the second run is left after the first was removed by hand.
    let kept_run_dir = test_dir.join("run-0001");
    fs::create_dir(&kept_run_dir).expect("failed to create run directory");
    fs::write(kept_run_dir.join("notes.txt"), "keep").expect("failed to write notes");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    let new_run_dir = test_dir.join("run-0002");
    assert!(new_run_dir.join("trajectories-0000.msgpack").is_file());
    assert!(new_run_dir.join("checkpoint.msgpack").is_file());
    assert!(kept_run_dir.join("notes.txt").is_file());
    assert!(!kept_run_dir.join("trajectories-0000.msgpack").exists());
    assert!(!test_dir.join("run-0000").exists());

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);
    assert!(new_run_dir.join("results.msgpack").is_file());

    fs::remove_dir_all(&test_dir).ok();
}
