//! End-to-end workflow runs against a mock portal.

mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::{config, html, login_redirect, mount_login};
use ispflow_core::{InstallationRequest, MemoryStore};
use ispflow_portal::{
    ActivateCommand, CorrectionTables, CreateTicketCommand, EditInstallationCommand, MatchKind,
    Orchestrator, PortalClient, PortalError, PreconditionReason, UpdateRequest,
};
use wiremock::matchers::{body_string_contains, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body><table>
  <tr><th>Cliente</th><th>Acciones</th></tr>
  <tr><td>Luis Rojas</td><td><a href="/preinstalaciones/41/activar/">Activar</a></td></tr>
  <tr><td>Ana Torres</td><td><a href="/preinstalaciones/42/ver/">Ver</a>
      <a href="/preinstalaciones/42/activar/">Activar</a></td></tr>
</table></body></html>"#;

const ACTIVATION_FORM: &str = r#"<html><head><script>var gateway = "10.0.0.1";</script></head>
<body>
<p>IP disponible: 10.20.30.40</p>
<form method="post">
  <input type="hidden" name="csrfmiddlewaretoken" value="tok-form">
  <input name="usuario-first_name" value="">
  <input name="usuario-last_name" value="">
  <input name="usuario-username" value="">
  <input name="perfil-rut" value="">
  <input name="perfil-direccion" value="">
  <input name="perfil-telefono" value="">
  <input name="servicio-codigo" value="">
  <select name="servicio-tecnico">
    <option value="">---------</option>
    <option value="7">Carlos Mendoza</option>
    <option value="8">Pedro Soto</option>
  </select>
  <select name="servicio-plan">
    <option value="">---------</option>
    <option value="3">Plan 50MB</option>
    <option value="4">Plan 100MB</option>
  </select>
  <select name="servicio-zona">
    <option value="">---------</option>
    <option value="20">Villa Maule - Zona 200 - Vlan 200</option>
    <option value="21">Villa Maule - Zona 201 - Vlan 201</option>
  </select>
  <input name="servicio-ip" value="">
  <input type="date" name="servicio-fecha_instalacion" value="">
  <input type="submit" name="guardar" value="Activar">
</form>
</body></html>"#;

fn ana_torres(agreed: Option<NaiveDate>) -> InstallationRequest {
    InstallationRequest {
        id: 42,
        first_name: "Ana".to_string(),
        last_name: "Torres".to_string(),
        national_id: Some("12.345.678-k".to_string()),
        email: Some("ana@example.com".to_string()),
        phone: Some("+56 9 1234 5678".to_string()),
        address: Some("Los Aromos 123".to_string()),
        city: Some("Talca".to_string()),
        plan_name: Some("50 megas".to_string()),
        zone_hint: Some("Villa Maule - Z201".to_string()),
        agreed_installation_date: agreed,
        activated_at: None,
        portal_external_id: None,
    }
}

fn agreed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

fn orchestrator(server: &MockServer, store: &Arc<MemoryStore>) -> Orchestrator {
    Orchestrator::new(
        PortalClient::new(config(server)),
        store.clone(),
        Arc::new(CorrectionTables::builtin().unwrap()),
    )
}

fn activate_ana() -> ActivateCommand {
    ActivateCommand {
        client_name: Some("ana torres".to_string()),
        technician: "Carlos".to_string(),
        ..ActivateCommand::default()
    }
}

async fn mount_activation_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/preinstalaciones/"))
        .respond_with(html(LISTING))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/preinstalaciones/42/activar/"))
        .respond_with(html(ACTIVATION_FORM))
        .mount(server)
        .await;
}

fn activation_post() -> Mock {
    Mock::given(method("POST"))
        .and(path("/preinstalaciones/42/activar/"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-form"))
        .and(body_string_contains("usuario-first_name=Ana"))
        .and(body_string_contains("usuario-username=INST-42"))
        .and(body_string_contains("perfil-rut=12345678-K"))
        .and(body_string_contains("servicio-codigo=INST-42"))
        .and(body_string_contains("servicio-tecnico=7"))
        .and(body_string_contains("servicio-plan=3"))
        .and(body_string_contains("servicio-zona=21"))
        .and(body_string_contains("servicio-ip=10.20.30.40"))
        .and(body_string_contains("servicio-fecha_instalacion=2026-10-20"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/clientes/INST-42/"))
}

#[tokio::test]
async fn activation_end_to_end() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    activation_post().expect(1).mount(&server).await;

    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    let command = ActivateCommand {
        plan_override: Some("Plan 50MB".to_string()),
        ..activate_ana()
    };
    let outcome = orchestrator(&server, &store)
        .activate(&command)
        .await
        .expect("activation");

    assert_eq!(outcome.record_id, 42);
    assert_eq!(outcome.external_id, "INST-42");
    assert_eq!(outcome.available_ip, "10.20.30.40");
    assert_eq!(outcome.technician.text, "Carlos Mendoza");
    assert_eq!(outcome.plan.text, "Plan 50MB");
    assert_eq!(outcome.plan.kind, MatchKind::ExactText);
    let zone = outcome.zone.as_ref().expect("zone resolved");
    assert_eq!(zone.value, "21");
    assert_eq!(zone.kind, MatchKind::Correction);
    assert_eq!(outcome.submit.location.as_deref(), Some("/clientes/INST-42/"));
    assert!(outcome.local_record_updated);

    let record = store.snapshot(42).unwrap();
    assert!(record.activated_at.is_some());
    assert_eq!(record.portal_external_id.as_deref(), Some("INST-42"));
}

#[tokio::test]
async fn agreed_date_from_the_command_is_stored_first() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    activation_post().expect(1).mount(&server).await;

    let store = Arc::new(MemoryStore::new([ana_torres(None)]));
    let command = ActivateCommand {
        record_id: Some(42),
        agreed_installation_date: Some(agreed_date()),
        ..activate_ana()
    };
    let outcome = orchestrator(&server, &store).activate(&command).await.unwrap();
    assert_eq!(outcome.plan.value, "3");
    assert_eq!(outcome.plan.kind, MatchKind::Correction);

    let record = store.snapshot(42).unwrap();
    assert_eq!(record.agreed_installation_date, Some(agreed_date()));
    assert!(record.activated_at.is_some());
}

#[tokio::test]
async fn missing_agreed_date_never_submits() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    Mock::given(method("POST"))
        .and(path("/preinstalaciones/42/activar/"))
        .respond_with(ResponseTemplate::new(302))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([ana_torres(None)]));
    let err = orchestrator(&server, &store)
        .activate(&activate_ana())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PortalError::Precondition {
            reason: PreconditionReason::MissingAgreedDate,
            ..
        }
    ));
    assert!(store.snapshot(42).unwrap().activated_at.is_none());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty(), "portal was contacted: {requests:?}");
}

#[tokio::test]
async fn unknown_technician_never_submits() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    Mock::given(method("POST"))
        .and(path("/preinstalaciones/42/activar/"))
        .respond_with(ResponseTemplate::new(302))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    let command = ActivateCommand {
        technician: "Zacarias Quintanilla".to_string(),
        ..activate_ana()
    };
    let err = orchestrator(&server, &store).activate(&command).await.unwrap_err();

    assert!(matches!(
        err,
        PortalError::Precondition {
            reason: PreconditionReason::TechnicianUnresolved,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_client_is_not_found() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    let command = ActivateCommand {
        client_name: Some("Pedro Soto".to_string()),
        ..activate_ana()
    };
    let err = orchestrator(&server, &store).activate(&command).await.unwrap_err();
    assert!(matches!(err, PortalError::NotFound { .. }));
}

#[tokio::test]
async fn rejected_activation_reports_field_errors() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    let rerendered = ACTIVATION_FORM.replace(
        r#"<input name="servicio-ip" value="">"#,
        r#"<ul class="errorlist"><li>La IP ya está en uso</li></ul><input name="servicio-ip" value="" required>"#,
    );
    Mock::given(method("POST"))
        .and(path("/preinstalaciones/42/activar/"))
        .respond_with(html(&rerendered))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    let err = orchestrator(&server, &store)
        .activate(&activate_ana())
        .await
        .unwrap_err();

    match err {
        PortalError::Validation { messages, .. } => {
            assert_eq!(messages, vec!["La IP ya está en uso".to_string()]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(store.snapshot(42).unwrap().activated_at.is_none());
}

#[tokio::test]
async fn local_write_failure_is_reported_not_swallowed() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_activation_pages(&server).await;
    activation_post().mount(&server).await;

    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    store.fail_activation_writes(true);
    let outcome = orchestrator(&server, &store)
        .activate(&activate_ana())
        .await
        .unwrap();

    assert!(!outcome.local_record_updated);
    assert!(store.snapshot(42).unwrap().activated_at.is_none());
}

#[tokio::test]
async fn activation_survives_mid_workflow_session_expiry() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/preinstalaciones/42/activar/"))
        .respond_with(login_redirect("/preinstalaciones/42/activar/"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_activation_pages(&server).await;
    activation_post().expect(1).mount(&server).await;

    let store = Arc::new(MemoryStore::new([ana_torres(Some(agreed_date()))]));
    let orchestrator = orchestrator(&server, &store);
    orchestrator.activate(&activate_ana()).await.unwrap();

    assert_eq!(orchestrator.portal().sessions().login_count(), 2);
}

const TICKET_FORM: &str = r#"<form method="post" enctype="multipart/form-data">
  <input type="hidden" name="csrfmiddlewaretoken" value="tok-ticket">
  <select name="categoria">
    <option value="">---------</option>
    <option value="1">Falla</option>
    <option value="3">Visita tecnica</option>
  </select>
  <select name="tecnico">
    <option value="">---------</option>
    <option value="7">Carlos Mendoza</option>
    <option value="8">Pedro Soto</option>
  </select>
  <input name="fecha_inicio" value="">
  <input name="fecha_fin" value="">
  <input name="asunto" value="">
  <textarea name="descripcion"></textarea>
  <select name="prioridad"><option value="1" selected>Normal</option><option value="2">Alta</option></select>
  <input type="file" name="adjunto">
</form>"#;

fn ticket_command() -> CreateTicketCommand {
    CreateTicketCommand {
        category_id: "3".to_string(),
        start_time: "2026-10-20 09:00".to_string(),
        end_time: "2026-10-20 11:00".to_string(),
        technician: "Pedro".to_string(),
        subject: "Sin servicio".to_string(),
        description: Some("Cliente sin enlace".to_string()),
        ..CreateTicketCommand::default()
    }
}

#[tokio::test]
async fn ticket_is_created_with_technician_resolved_by_name() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/tickets/agregar/"))
        .respond_with(html(TICKET_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets/agregar/"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-ticket"))
        .and(body_string_contains("categoria=3"))
        .and(body_string_contains("tecnico=8"))
        .and(body_string_contains("asunto=Sin+servicio"))
        .and(body_string_contains("prioridad=1"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/tickets/481/"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([]));
    let outcome = orchestrator(&server, &store)
        .create_ticket(&ticket_command())
        .await
        .unwrap();

    assert_eq!(outcome.ticket_id.as_deref(), Some("481"));
    assert!(!outcome.attachment_removed);
    let technician = outcome.applied.iter().find(|a| a.key == "tecnico").unwrap();
    assert_eq!(technician.resolution.as_ref().map(|r| r.value.as_str()), Some("8"));
}

#[tokio::test]
async fn ticket_attachment_is_uploaded_and_cleaned_up() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/tickets/agregar/"))
        .respond_with(html(TICKET_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets/agregar/"))
        .and(header_regex("content-type", "multipart/form-data"))
        .and(body_string_contains(r#"name="adjunto"; filename="informe.txt""#))
        .and(body_string_contains("enlace caido"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/tickets/482/"))
        .expect(1)
        .mount(&server)
        .await;

    let staged = std::env::temp_dir()
        .join(format!("ispflow-{}", std::process::id()))
        .join("informe.txt");
    std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
    std::fs::write(&staged, "enlace caido desde las 08:00").unwrap();

    let command = CreateTicketCommand {
        attachment_path: Some(staged.clone()),
        remove_attachment_after: true,
        ..ticket_command()
    };
    let store = Arc::new(MemoryStore::new([]));
    let outcome = orchestrator(&server, &store).create_ticket(&command).await.unwrap();

    assert_eq!(outcome.ticket_id.as_deref(), Some("482"));
    assert!(outcome.attachment_removed);
    assert!(!staged.exists());
}

#[tokio::test]
async fn ticket_is_deleted_through_its_confirm_page() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/tickets/481/eliminar/"))
        .respond_with(html(
            r#"<form method="post"><input type="hidden" name="csrfmiddlewaretoken" value="tok-del">
               <p>¿Eliminar ticket 481?</p><input type="submit" value="Confirmar"></form>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets/481/eliminar/"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-del"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/tickets/"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([]));
    let submit = orchestrator(&server, &store).delete_ticket("481").await.unwrap();
    assert_eq!(submit.status, 302);
}

const INSTALLATION_FORM: &str = r#"<form method="post" action="/clientes/INST-42/instalaciones/9/editar/">
  <input type="hidden" name="csrfmiddlewaretoken" value="tok-edit">
  <input name="servicio-direccion" value="Los Aromos 123">
  <select name="servicio-tecnico">
    <option value="">---------</option>
    <option value="7" selected>Carlos Mendoza</option>
    <option value="8">Pedro Soto</option>
  </select>
  <textarea name="servicio-observacion">Cliente prefiere visita AM</textarea>
</form>"#;

#[tokio::test]
async fn installation_edit_merges_only_named_fields() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/clientes/INST-42/instalaciones/9/editar/"))
        .respond_with(html(INSTALLATION_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clientes/INST-42/instalaciones/9/editar/"))
        .and(body_string_contains("servicio-tecnico=8"))
        .and(body_string_contains("servicio-direccion=Los+Aromos+456"))
        .and(body_string_contains("servicio-observacion=Cliente+prefiere+visita+AM"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/clientes/INST-42/"))
        .expect(1)
        .mount(&server)
        .await;

    let command = EditInstallationCommand {
        external_id: "INST-42".to_string(),
        installation_id: "9".to_string(),
        fields: UpdateRequest::new()
            .with("tecnicoId", "Pedro Soto")
            .with("direccion", "Los Aromos 456"),
    };
    let store = Arc::new(MemoryStore::new([]));
    let outcome = orchestrator(&server, &store)
        .edit_installation(&command)
        .await
        .unwrap();

    assert_eq!(outcome.submit.status, 302);
    assert_eq!(outcome.applied.len(), 2);
}

#[tokio::test]
async fn installation_edit_with_unknown_technician_never_submits() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/clientes/INST-42/instalaciones/9/editar/"))
        .respond_with(html(INSTALLATION_FORM))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clientes/INST-42/instalaciones/9/editar/"))
        .respond_with(ResponseTemplate::new(302))
        .expect(0)
        .mount(&server)
        .await;

    let command = EditInstallationCommand {
        external_id: "INST-42".to_string(),
        installation_id: "9".to_string(),
        fields: UpdateRequest::new().with("tecnico", "Zacarias Quintanilla"),
    };
    let store = Arc::new(MemoryStore::new([]));
    let err = orchestrator(&server, &store)
        .edit_installation(&command)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PortalError::Precondition {
            reason: PreconditionReason::TechnicianUnresolved,
            ..
        }
    ));
}

#[tokio::test]
async fn installation_is_deleted_through_its_confirm_page() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/clientes/INST-42/eliminar/"))
        .respond_with(html(
            r#"<form method="post"><input type="hidden" name="csrfmiddlewaretoken" value="tok-del"></form>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clientes/INST-42/eliminar/"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/clientes/"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new([]));
    let submit = orchestrator(&server, &store)
        .delete_installation("INST-42")
        .await
        .unwrap();
    assert_eq!(submit.location.as_deref(), Some("/clientes/"));
}
