use chrono::NaiveDate;
use clap::Parser;
use ispflow_portal::{ActivateCommand, CreateTicketCommand};
use serde_json::json;

use super::*;

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["ispflow"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_db_migrate_command() {
    let cli = Cli::try_parse_from(["ispflow", "db", "migrate"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn activate_requires_a_record_id_or_client_name() {
    let err = Cli::try_parse_from(["ispflow", "activate", "--technician", "Carlos"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn activate_args_become_a_command() {
    let cli = Cli::try_parse_from([
        "ispflow",
        "activate",
        "--client",
        "Ana Torres",
        "--technician",
        "Carlos Mendoza",
        "--plan",
        "Fibra 300",
        "--date",
        "2026-10-20",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Activate(args)) = cli.command else {
        panic!("expected activate command");
    };
    let command = ActivateCommand::from(args);
    assert_eq!(command.record_id, None);
    assert_eq!(command.client_name.as_deref(), Some("Ana Torres"));
    assert_eq!(command.technician, "Carlos Mendoza");
    assert_eq!(command.plan_override.as_deref(), Some("Fibra 300"));
    assert_eq!(command.agreed_installation_date, NaiveDate::from_ymd_opt(2026, 10, 20));
}

#[test]
fn activate_rejects_malformed_dates() {
    let result = Cli::try_parse_from([
        "ispflow",
        "activate",
        "--record-id",
        "42",
        "--technician",
        "7",
        "--date",
        "20/10/2026",
    ]);
    assert!(result.is_err());
}

#[test]
fn remove_attachment_requires_an_attachment() {
    let base = [
        "ispflow",
        "create-ticket",
        "--category",
        "3",
        "--start",
        "2026-10-20 09:00",
        "--end",
        "2026-10-20 11:00",
        "--technician",
        "Pedro Soto",
        "--subject",
        "Sin servicio",
    ];
    let mut args = base.to_vec();
    args.push("--remove-attachment");
    assert!(Cli::try_parse_from(args).is_err());

    let mut args = base.to_vec();
    args.extend(["--attachment", "/tmp/foto.jpg", "--remove-attachment"]);
    let cli = Cli::try_parse_from(args).expect("expected valid cli args");
    let Some(Commands::CreateTicket(args)) = cli.command else {
        panic!("expected create-ticket command");
    };
    let command = CreateTicketCommand::from(args);
    assert_eq!(command.category_id, "3");
    assert!(command.remove_attachment_after);
    assert_eq!(
        command.attachment_path.as_deref(),
        Some(std::path::Path::new("/tmp/foto.jpg"))
    );
}

#[test]
fn assignments_keep_json_literals_and_fall_back_to_strings() {
    assert_eq!(
        parse_assignment("tecnico=7").unwrap(),
        ("tecnico".to_string(), json!(7))
    );
    assert_eq!(
        parse_assignment("estado=cerrado").unwrap(),
        ("estado".to_string(), json!("cerrado"))
    );
    assert_eq!(
        parse_assignment("observaciones=null").unwrap(),
        ("observaciones".to_string(), json!(null))
    );
    assert_eq!(
        parse_assignment("direccion=Los Aromos 123").unwrap(),
        ("direccion".to_string(), json!("Los Aromos 123"))
    );
    assert!(parse_assignment("sin-igual").is_err());
    assert!(parse_assignment("=valor").is_err());
}

#[test]
fn edit_installation_collects_repeated_sets() {
    let cli = Cli::try_parse_from([
        "ispflow",
        "edit-installation",
        "--external-id",
        "INST-42",
        "--installation-id",
        "9",
        "--set",
        "tecnico=Carlos Mendoza",
        "--set",
        "observaciones=null",
    ])
    .expect("expected valid cli args");

    let Some(Commands::EditInstallation { set, .. }) = cli.command else {
        panic!("expected edit-installation command");
    };
    let update = portal::update_from_assignments(set);
    assert_eq!(update.len(), 2);
    assert_eq!(update.get("tecnico"), Some(&json!("Carlos Mendoza")));
    assert_eq!(update.get("observaciones"), Some(&json!(null)));
}

#[test]
fn remote_edit_ticket_requires_a_field() {
    assert!(Cli::try_parse_from(["ispflow", "remote", "edit-ticket", "15"]).is_err());
    let cli = Cli::try_parse_from(["ispflow", "remote", "edit-ticket", "15", "--set", "estado=cerrado"])
        .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Remote {
            command: RemoteCommands::EditTicket { ref ticket_id, .. }
        }) if ticket_id == "15"
    ));
}
