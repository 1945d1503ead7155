//! Pre-installation activation.
//!
//! `FindRecord → FindPreinstallRow → LoadActivationForm →
//! ResolveIdentifiers → SubmitActivation → Done`; any step may fail with a
//! typed [`PortalError`]. Only after the portal accepts the activation is
//! the local record marked activated.

use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};

use chrono::{NaiveDate, Utc};
use ispflow_core::similarity::{best_record_match, token_set, RECORD_MATCH_THRESHOLD};
use ispflow_core::text::normalize_identifier;
use ispflow_core::InstallationRequest;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{classify_submission, fill_csrf, find_select, Orchestrator, SubmitOutcome};
use crate::aliases::{Payload, PayloadError};
use crate::error::{PortalError, PreconditionReason};
use crate::form::{extract_snapshot, find_prefixed_field, map_update_key_to_field, FieldMapping, FormSnapshot};
use crate::options::{resolve_option, MatchKind, OptionCandidate, OptionDomain, Resolution};
use crate::session::PortalSession;

static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("valid ipv4 regex"));

const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Inbound activation request.
///
/// Payload keys may use any listed alias; the first non-null one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ActivateCommand {
    pub record_id: Option<i64>,
    pub client_name: Option<String>,
    pub technician: String,
    pub plan_override: Option<String>,
    pub zone_hint: Option<String>,
    pub router_hint: Option<String>,
    pub ap_hint: Option<String>,
    pub agreed_installation_date: Option<NaiveDate>,
}

impl TryFrom<Map<String, Value>> for ActivateCommand {
    type Error = PayloadError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let payload = Payload::new(&map);
        Ok(Self {
            record_id: payload.opt(&["record_id", "recordId", "id", "solicitudId"])?,
            client_name: payload.opt(&[
                "client_name",
                "clientName",
                "cliente",
                "nombreCliente",
                "nombre",
            ])?,
            technician: payload.required_id(&[
                "technician",
                "tecnico",
                "tecnicoId",
                "tecnico_id",
                "tecnicoName",
                "technicianName",
            ])?,
            plan_override: payload.opt(&["plan_override", "plan", "planName", "plan_name"])?,
            zone_hint: payload.opt(&["zone_hint", "zona", "zone", "zoneName"])?,
            router_hint: payload.opt(&["router_hint", "router", "routerName"])?,
            ap_hint: payload.opt(&["ap_hint", "ap", "apName", "sectorial"])?,
            agreed_installation_date: payload.opt(&[
                "agreed_installation_date",
                "fechaInstalacion",
                "fecha_instalacion",
                "agreedDate",
            ])?,
        })
    }
}

/// Activation workflow states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStep {
    FindRecord,
    FindPreinstallRow,
    LoadActivationForm,
    ResolveIdentifiers,
    SubmitActivation,
    Done,
}

impl std::fmt::Display for ActivationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivationStep::FindRecord => "find_record",
            ActivationStep::FindPreinstallRow => "find_preinstall_row",
            ActivationStep::LoadActivationForm => "load_activation_form",
            ActivationStep::ResolveIdentifiers => "resolve_identifiers",
            ActivationStep::SubmitActivation => "submit_activation",
            ActivationStep::Done => "done",
        };
        f.write_str(s)
    }
}

/// Everything an activation decided and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationOutcome {
    pub record_id: i64,
    pub client_name: String,
    pub external_id: String,
    pub available_ip: String,
    pub technician: Resolution,
    pub plan: Resolution,
    pub zone: Option<Resolution>,
    pub router: Option<Resolution>,
    pub ap: Option<Resolution>,
    pub submit: SubmitOutcome,
    /// False when the portal accepted the activation but the local store
    /// could not record it.
    pub local_record_updated: bool,
}

struct ResolvedIdentifiers {
    technician: (String, Resolution),
    plan: (String, Resolution),
    zone: Option<(String, Resolution)>,
    router: Option<(String, Resolution)>,
    ap: Option<(String, Resolution)>,
    available_ip: Ipv4Addr,
}

struct PortalActivation {
    resolved: ResolvedIdentifiers,
    submit: SubmitOutcome,
}

fn enter(step: ActivationStep, record_id: Option<i64>) {
    tracing::info!(step = %step, record_id, "activation step");
}

/// Href of the activation link in the listing row naming `client_name`.
fn find_preinstall_link(html: &str, client_name: &str, marker: &str) -> Option<String> {
    let wanted = token_set(client_name);
    if wanted.is_empty() {
        return None;
    }
    let document = Html::parse_document(html);
    document.select(&ROW).find_map(|row| {
        let text = row.text().collect::<Vec<_>>().join(" ");
        if !wanted.is_subset(&token_set(&text)) {
            return None;
        }
        row.select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| href.contains(marker))
            .map(str::to_owned)
    })
}

/// First IPv4 address in the page's visible text.
fn first_visible_ipv4(html: &str) -> Option<Ipv4Addr> {
    let document = Html::parse_document(html);
    document.root_element().descendants().find_map(|node| {
        let text = node.value().as_text()?;
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| INVISIBLE_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            return None;
        }
        IPV4.find_iter(text)
            .find_map(|m| m.as_str().parse::<Ipv4Addr>().ok())
    })
}

fn set_prefixed(
    fields: &mut FormSnapshot,
    names: &[String],
    prefix: &str,
    keys: &[&str],
    value: Option<&str>,
) {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return;
    };
    if let Some(name) = find_prefixed_field(names.iter().map(String::as_str), prefix, keys) {
        fields.set(&name, value);
    }
}

fn required(
    select: Option<(String, Vec<OptionCandidate>)>,
    target: &str,
    domain: OptionDomain,
    orchestrator: &Orchestrator,
    reason: PreconditionReason,
) -> Result<(String, Resolution), PortalError> {
    let (name, options) = select.ok_or_else(|| {
        PortalError::precondition(reason, format!("activation form has no {domain} select"))
    })?;
    match resolve_option(&options, target, domain, orchestrator.corrections()) {
        Some(resolution) if resolution.is_confident() => {
            tracing::info!(%domain, label = target, option = %resolution.text, kind = ?resolution.kind, "resolved option");
            Ok((name, resolution))
        }
        other => Err(PortalError::precondition(
            reason,
            format!(
                "no {domain} option confidently matches '{target}' (best: {})",
                other.map_or_else(|| "none".to_string(), |r| format!("{} @ {:.2}", r.text, r.score))
            ),
        )),
    }
}

fn optional(
    select: Option<(String, Vec<OptionCandidate>)>,
    target: Option<&str>,
    domain: OptionDomain,
    orchestrator: &Orchestrator,
) -> Option<(String, Resolution)> {
    let (name, options) = select?;
    let resolution = resolve_option(&options, target.unwrap_or_default(), domain, orchestrator.corrections())?;
    if resolution.kind == MatchKind::Fallback {
        tracing::warn!(%domain, hint = target.unwrap_or_default(), option = %resolution.text, "no match; using first available option");
    } else {
        tracing::info!(%domain, option = %resolution.text, kind = ?resolution.kind, "resolved option");
    }
    Some((name, resolution))
}

impl Orchestrator {
    /// Activates one pending installation request on the portal.
    ///
    /// # Errors
    ///
    /// - [`PortalError::NotFound`] when no record or listing row matches.
    /// - [`PortalError::Precondition`] for unresolved technician/plan, a
    ///   missing IP or a missing agreed date; nothing is submitted.
    /// - [`PortalError::Validation`] when the portal rejects the form.
    /// - Session, transport and store errors as they occur.
    pub async fn activate(&self, command: &ActivateCommand) -> Result<ActivationOutcome, PortalError> {
        enter(ActivationStep::FindRecord, command.record_id);
        let mut record = self.find_record(command).await?;

        if let Some(date) = command.agreed_installation_date {
            if record.agreed_installation_date != Some(date) {
                self.store.set_agreed_date(record.id, date).await?;
                tracing::info!(record_id = record.id, %date, "stored agreed installation date");
                record.agreed_installation_date = Some(date);
            }
        }
        let date = record.agreed_installation_date.ok_or_else(|| {
            PortalError::precondition(
                PreconditionReason::MissingAgreedDate,
                format!("installation request {} has no agreed installation date", record.id),
            )
        })?;

        let external_id = self.portal().config().external_id_for(record.id);
        let record = &record;
        let external = external_id.as_str();
        let PortalActivation { resolved, submit } = self
            .portal()
            .with_session_retry("activation", move |session| {
                self.activate_on_portal(session, record, command, external, date)
            })
            .await?;

        let local_record_updated = match self
            .store
            .mark_activated(record.id, &external_id, Utc::now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    record_id = record.id,
                    external_id = %external_id,
                    error = %e,
                    "portal activation succeeded but the local record was not updated"
                );
                false
            }
        };

        enter(ActivationStep::Done, Some(record.id));
        Ok(ActivationOutcome {
            record_id: record.id,
            client_name: record.full_name(),
            external_id,
            available_ip: resolved.available_ip.to_string(),
            technician: resolved.technician.1,
            plan: resolved.plan.1,
            zone: resolved.zone.map(|(_, r)| r),
            router: resolved.router.map(|(_, r)| r),
            ap: resolved.ap.map(|(_, r)| r),
            submit,
            local_record_updated,
        })
    }

    async fn find_record(&self, command: &ActivateCommand) -> Result<InstallationRequest, PortalError> {
        if let Some(id) = command.record_id {
            return self.store.get(id).await?.ok_or_else(|| PortalError::NotFound {
                what: "installation request",
                key: id.to_string(),
            });
        }

        let name = command
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PortalError::precondition(
                    PreconditionReason::MissingClientIdentity,
                    "a record id or client name is required",
                )
            })?;

        let mut pending = self.store.list_pending().await?;
        let names: Vec<String> = pending.iter().map(InstallationRequest::full_name).collect();
        let candidates = names.iter().map(String::as_str);
        let (idx, score) = best_record_match(name, candidates, RECORD_MATCH_THRESHOLD)
            .ok_or_else(|| PortalError::NotFound {
                what: "pending installation request",
                key: name.to_string(),
            })?;
        tracing::info!(client = name, record_id = pending[idx].id, score, "matched installation request");
        Ok(pending.swap_remove(idx))
    }

    async fn activate_on_portal(
        &self,
        session: Arc<PortalSession>,
        record: &InstallationRequest,
        command: &ActivateCommand,
        external_id: &str,
        date: NaiveDate,
    ) -> Result<PortalActivation, PortalError> {
        let config = self.portal().config();

        enter(ActivationStep::FindPreinstallRow, Some(record.id));
        let listing = self.portal().get_page(&session, &config.routes.preinstall_list).await?;
        let client_name = record.full_name();
        let href = find_preinstall_link(&listing.body, &client_name, &config.routes.activation_marker)
            .ok_or_else(|| PortalError::NotFound {
                what: "pre-installation row",
                key: client_name.clone(),
            })?;
        let form_url = self.portal().resolve(&listing.url, &href)?;

        enter(ActivationStep::LoadActivationForm, Some(record.id));
        let page = self.portal().get_page(&session, form_url.as_str()).await?;
        let snapshot = extract_snapshot(&page.body, None)?;
        let service = config.prefixes.service.as_str();
        let technician_select = find_select(&page.body, service, &["tecnico", "technician"]);
        let plan_select = find_select(&page.body, service, &["plan"]);
        let zone_select = find_select(&page.body, service, &["zona", "zone"]);
        let router_select = find_select(&page.body, service, &["router", "equipo"]);
        let ap_select = find_select(&page.body, service, &["ap", "nap", "sectorial"]);
        let available_ip = first_visible_ipv4(&page.body);

        enter(ActivationStep::ResolveIdentifiers, Some(record.id));
        let technician = required(
            technician_select,
            &command.technician,
            OptionDomain::Technician,
            self,
            PreconditionReason::TechnicianUnresolved,
        )?;
        let plan_target = command
            .plan_override
            .as_deref()
            .or(record.plan_name.as_deref())
            .ok_or_else(|| {
                PortalError::precondition(
                    PreconditionReason::PlanUnresolved,
                    "neither the command nor the record names a plan",
                )
            })?;
        let plan = required(
            plan_select,
            plan_target,
            OptionDomain::Plan,
            self,
            PreconditionReason::PlanUnresolved,
        )?;
        let zone_target = command.zone_hint.as_deref().or(record.zone_hint.as_deref());
        let zone = optional(zone_select, zone_target, OptionDomain::Zone, self);
        let router = optional(router_select, command.router_hint.as_deref(), OptionDomain::Router, self);
        let ap = optional(ap_select, command.ap_hint.as_deref(), OptionDomain::Ap, self);
        let available_ip = available_ip.ok_or_else(|| {
            PortalError::precondition(
                PreconditionReason::AvailableIpMissing,
                "activation page shows no available IPv4 address",
            )
        })?;
        let resolved = ResolvedIdentifiers {
            technician,
            plan,
            zone,
            router,
            ap,
            available_ip,
        };

        enter(ActivationStep::SubmitActivation, Some(record.id));
        let fields = self.activation_fields(snapshot, record, &resolved, external_id, date, &session);
        let action = self.form_action(form_url.as_str(), &fields)?;
        let response = self
            .portal()
            .post_form(&session, &action, fields.fields(), form_url.as_str())
            .await?;
        let submit = classify_submission(response)?;
        tracing::info!(record_id = record.id, external_id, status = submit.status, "portal accepted activation");

        Ok(PortalActivation { resolved, submit })
    }

    fn activation_fields(
        &self,
        snapshot: FormSnapshot,
        record: &InstallationRequest,
        resolved: &ResolvedIdentifiers,
        external_id: &str,
        date: NaiveDate,
        session: &PortalSession,
    ) -> FormSnapshot {
        let prefixes = &self.portal().config().prefixes;
        let names: Vec<String> = snapshot.known_names().into_iter().map(str::to_owned).collect();
        let mut fields = snapshot;

        let user = prefixes.user.as_str();
        set_prefixed(&mut fields, &names, user, &["first_name", "nombre", "nombres"], Some(&record.first_name));
        set_prefixed(&mut fields, &names, user, &["last_name", "apellido", "apellidos"], Some(&record.last_name));
        set_prefixed(&mut fields, &names, user, &["email", "correo"], record.email.as_deref());
        set_prefixed(&mut fields, &names, user, &["username"], Some(external_id));

        let profile = prefixes.profile.as_str();
        let national_id = record.national_id.as_deref().map(normalize_identifier);
        set_prefixed(&mut fields, &names, profile, &["rut", "cedula", "documento", "dni"], national_id.as_deref());
        set_prefixed(&mut fields, &names, profile, &["direccion", "domicilio", "address"], record.address.as_deref());
        set_prefixed(&mut fields, &names, profile, &["ciudad", "comuna", "city"], record.city.as_deref());
        set_prefixed(&mut fields, &names, profile, &["telefono", "celular", "fono", "phone"], record.phone.as_deref());
        set_prefixed(&mut fields, &names, profile, &["email", "correo"], record.email.as_deref());

        let service = prefixes.service.as_str();
        set_prefixed(&mut fields, &names, service, &["codigo", "external_id", "id_externo"], Some(external_id));
        for (name, resolution) in [Some(&resolved.technician), Some(&resolved.plan)]
            .into_iter()
            .chain([resolved.zone.as_ref(), resolved.router.as_ref(), resolved.ap.as_ref()])
            .flatten()
        {
            fields.set(name, resolution.value.as_str());
        }

        let ip = resolved.available_ip.to_string();
        match find_prefixed_field(names.iter().map(String::as_str), service, &["ip", "ip_address", "direccion_ip"]) {
            Some(name) => fields.set(&name, ip),
            None => {
                tracing::warn!(prefix = service, "activation form has no IP field; adding one");
                fields.set(&format!("{service}ip"), ip);
            }
        }

        let service_names: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| n.starts_with(service))
            .collect();
        let date_field = find_prefixed_field(
            service_names.iter().copied(),
            service,
            &["fecha_instalacion", "fecha_acordada", "installation_date"],
        )
        .or_else(|| match map_update_key_to_field("fechaInstalacion", &service_names) {
            FieldMapping::Exact { field } | FieldMapping::Heuristic { field } => Some(field),
            FieldMapping::Fuzzy { .. } | FieldMapping::Unmapped { .. } => None,
        });
        match date_field {
            Some(name) => fields.set(&name, date.format("%Y-%m-%d").to_string()),
            None => tracing::warn!("activation form has no installation date field"),
        }

        fill_csrf(&mut fields, &self.portal().config().csrf_field, session);
        fields
    }
}
