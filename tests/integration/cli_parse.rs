use buildtrack::tooling::cli::{Cli, Commands, GcCommands};
use clap::{CommandFactory, Parser};

#[test]
fn parse_valid_command_matrix() {
    let cases: Vec<Vec<&str>> = vec![
        vec![
            "buildtrack",
            "prepare",
            "--collection-id",
            "c1",
            "--definition-id",
            "42",
        ],
        vec![
            "buildtrack",
            "--work-dir",
            "/agent/_work",
            "prepare",
            "--collection-id",
            "c1",
            "--definition-id",
            "42",
            "--repository-url",
            "https://git.example/repo",
            "--sources-directory",
            "src",
            "--force-directory",
        ],
        vec!["buildtrack", "show", "--hash-key", "abc"],
        vec!["buildtrack", "list", "--format", "json"],
        vec!["buildtrack", "maintenance", "start", "--hash-key", "abc"],
        vec!["buildtrack", "maintenance", "complete", "--hash-key", "abc"],
        vec!["buildtrack", "gc", "mark", "--expiration-days", "7"],
        vec!["buildtrack", "gc", "sweep"],
        vec!["buildtrack", "gc", "run"],
        vec!["buildtrack", "config", "show"],
        vec!["buildtrack", "--log-level", "trace", "--log-output", "file", "gc", "run"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_ok(), "expected valid parse for args: {args:?}");
    }
}

#[test]
fn parse_rejects_incomplete_commands() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["buildtrack"],
        vec!["buildtrack", "prepare", "--collection-id", "c1"],
        vec!["buildtrack", "show"],
        vec!["buildtrack", "maintenance", "start"],
        vec!["buildtrack", "gc", "mark", "--expiration-days", "soon"],
        vec!["buildtrack", "gc"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_err(), "expected parse failure for args: {args:?}");
    }
}

#[test]
fn parse_gc_mark_expiration_override() {
    let cli = Cli::try_parse_from(["buildtrack", "gc", "mark", "--expiration-days", "3"]).unwrap();
    match cli.command {
        Commands::Gc {
            command:
                GcCommands::Mark {
                    expiration_days,
                    format,
                },
        } => {
            assert_eq!(expiration_days, Some(3));
            assert_eq!(format, "text");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}
