//! Terminal screens: login, user list, user detail/form and delete.
//!
//! Every screen but login checks the session first and sends the operator
//! to `/login` when there is none. Failures are shown as one short line;
//! the detail goes to the log.

use crate::audit::AuditLog;
use crate::auth_api::AuthEndpoint;
use crate::error::SessionError;
use crate::prompt::Prompter;
use crate::session::{RemoteLogout, SessionManager};
use crate::token_store::TokenStore;
use crate::users::{FormMode, UserApi, UserDraft, UserFields, UserRecord, UserResource};
use anyhow::Result;
use serde_json::Value;
use std::io::Write;

const MSG_LOGIN_REQUIRED: &str = "Debe iniciar sesión para continuar (use /login).";
const MSG_SESSION_REJECTED: &str = "La sesión no es válida o expiró. Inicie sesión nuevamente.";

/// How a screen finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The operator has to log in before this screen can work
    NeedsLogin,
    Failed,
}

/// Output, input and journal shared by the screens
pub struct Ui<'a> {
    pub out: &'a mut dyn Write,
    pub prompter: &'a mut dyn Prompter,
    pub audit: Option<&'a mut AuditLog>,
    /// Skip confirmation questions
    pub assume_yes: bool,
}

impl Ui<'_> {
    fn say(&mut self, msg: &str) -> Result<()> {
        writeln!(self.out, "{}", msg)?;
        Ok(())
    }

    fn record(&mut self, entry: impl FnOnce(&mut AuditLog) -> Result<()>) {
        if let Some(audit) = self.audit.as_deref_mut() {
            if let Err(e) = entry(audit) {
                tracing::warn!(error = %e, "could not write audit entry");
            }
        }
    }
}

fn connect<'s, E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
    api: &'s dyn UserApi,
) -> Result<Option<Box<dyn UserResource + 's>>> {
    match session.access_token() {
        Some(token) => Ok(Some(api.connect(token))),
        None => {
            ui.say(MSG_LOGIN_REQUIRED)?;
            Ok(None)
        }
    }
}

/// Report a failed API call with a fixed message
fn report(ui: &mut Ui, err: &SessionError, fallback: &str) -> Result<Outcome> {
    tracing::warn!(error = %err, "{}", fallback);
    match err {
        SessionError::Authentication(_) => {
            ui.say(MSG_SESSION_REJECTED)?;
            Ok(Outcome::NeedsLogin)
        }
        _ => {
            ui.say(fallback)?;
            Ok(Outcome::Failed)
        }
    }
}

/// Like `report`, but field errors from the server are shown as sent
fn report_form(ui: &mut Ui, err: &SessionError, fallback: &str) -> Result<Outcome> {
    match err {
        SessionError::Api { .. } => {
            tracing::warn!(error = %err, "{}", fallback);
            ui.say(&err.user_message())?;
            Ok(Outcome::Failed)
        }
        _ => report(ui, err, fallback),
    }
}

pub fn login<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &mut SessionManager<E, S>,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Outcome> {
    if session.is_authenticated() {
        let who = session
            .claims()
            .and_then(|c| c.display_name())
            .unwrap_or_else(|| "el usuario actual".to_string());
        ui.say(&format!("Ya inició sesión como {}.", who))?;
        return Ok(Outcome::Done);
    }

    let username = match username {
        Some(u) => u.trim().to_string(),
        None => ui.prompter.ask("Usuario", "")?.unwrap_or_default(),
    };
    let password = match password {
        Some(p) => p.to_string(),
        None => ui.prompter.secret("Contraseña")?.unwrap_or_default(),
    };

    match session.login(&username, &password) {
        Ok(()) => {
            // Advisory identity for the greeting only
            let claims = session.claims();
            let name = claims
                .and_then(|c| c.display_name())
                .unwrap_or_else(|| username.clone());
            let user_id = claims.and_then(|c| c.user_id());
            ui.say(&format!("Bienvenido, {}.", name))?;
            ui.record(|a| a.login_ok(user_id));
            Ok(Outcome::Done)
        }
        Err(e) => {
            let msg = match &e {
                SessionError::Validation(_) => e.user_message(),
                SessionError::Authentication(_) => "Credenciales inválidas".to_string(),
                _ => "Error al iniciar sesión. Intente nuevamente.".to_string(),
            };
            ui.say(&msg)?;
            if !matches!(e, SessionError::Validation(_)) {
                ui.record(|a| a.login_failed(e.kind()));
            }
            Ok(Outcome::Failed)
        }
    }
}

pub fn logout<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &mut SessionManager<E, S>,
) -> Result<Outcome> {
    let was_authenticated = session.is_authenticated();
    let user_id = session.claims().and_then(|c| c.user_id());

    let report = session.logout();
    match report.remote {
        RemoteLogout::Failed => {
            ui.say("Sesión cerrada en este equipo (no se pudo notificar al servidor).")?
        }
        _ if was_authenticated => ui.say("Sesión cerrada.")?,
        _ => ui.say("No había una sesión activa.")?,
    }

    if was_authenticated {
        ui.record(|a| a.logout(user_id, report.remote.as_str(), report.cleared));
    }
    if !report.cleared {
        ui.say("No se pudo borrar la sesión guardada; bórrela a mano o se restaurará al volver a abrir.")?;
        return Ok(Outcome::Failed);
    }
    Ok(Outcome::Done)
}

pub fn refresh<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &mut SessionManager<E, S>,
) -> Result<Outcome> {
    if !session.is_authenticated() {
        ui.say(MSG_LOGIN_REQUIRED)?;
        return Ok(Outcome::NeedsLogin);
    }

    match session.refresh() {
        Ok(()) => {
            ui.say("Sesión renovada.")?;
            if let Some(exp) = session.claims().and_then(|c| c.expires_at()) {
                ui.say(&format!("Vence: {}", exp.format("%Y-%m-%d %H:%M:%S UTC")))?;
            }
            ui.record(|a| a.refresh(true, None));
            Ok(Outcome::Done)
        }
        Err(e) => {
            ui.record(|a| a.refresh(false, Some(e.kind())));
            match e {
                SessionError::Authentication(_) => {
                    ui.say(MSG_SESSION_REJECTED)?;
                    Ok(Outcome::NeedsLogin)
                }
                SessionError::Validation(_) => {
                    ui.say(&e.user_message())?;
                    Ok(Outcome::Failed)
                }
                _ => {
                    ui.say("No se pudo renovar la sesión. Intente nuevamente.")?;
                    Ok(Outcome::Failed)
                }
            }
        }
    }
}

pub fn whoami<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
) -> Result<Outcome> {
    if !session.is_authenticated() {
        ui.say(MSG_LOGIN_REQUIRED)?;
        return Ok(Outcome::NeedsLogin);
    }

    let Some(claims) = session.claims() else {
        ui.say("Sesión activa; la identidad no está disponible hasta un nuevo inicio de sesión.")?;
        return Ok(Outcome::Done);
    };

    let name = claims.display_name().unwrap_or_else(|| "-".to_string());
    ui.say(&format!("Sesión activa: {}", name))?;
    for (key, value) in claims.iter() {
        ui.say(&format!("  {}: {}", key, plain(value)))?;
    }
    if let Some(exp) = claims.expires_at() {
        ui.say(&format!("  (vence {})", exp.format("%Y-%m-%d %H:%M:%S UTC")))?;
    }
    ui.say("Datos del token sin verificar: el servidor valida cada solicitud.")?;
    Ok(Outcome::Done)
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn list<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
    api: &dyn UserApi,
) -> Result<Outcome> {
    let users = match connect(ui, session, api)? {
        Some(users) => users,
        None => return Ok(Outcome::NeedsLogin),
    };

    match users.list() {
        Ok(records) => {
            ui.say("Lista de Usuarios")?;
            ui.say(&render_table(&records))?;
            Ok(Outcome::Done)
        }
        Err(e) => report(ui, &e, "Error al cargar los usuarios"),
    }
}

const COLUMNS: [&str; 7] = [
    "ID", "Usuario", "Nombre", "Apellido", "Email", "DNI", "Teléfono",
];

fn row(record: &UserRecord) -> [String; 7] {
    [
        record.id.to_string(),
        record.username.clone(),
        record.first_name.clone(),
        record.last_name.clone(),
        record.email.clone(),
        record.dni.map(|n| n.to_string()).unwrap_or_default(),
        record.phone_number.map(|n| n.to_string()).unwrap_or_default(),
    ]
}

pub fn render_table(records: &[UserRecord]) -> String {
    if records.is_empty() {
        return "No hay usuarios registrados".to_string();
    }

    let rows: Vec<[String; 7]> = records.iter().map(row).collect();
    let mut widths = COLUMNS.map(|c| c.chars().count());
    for r in &rows {
        for (w, cell) in widths.iter_mut().zip(r.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let format_line = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_line(&COLUMNS)];
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for r in &rows {
        let cells: Vec<&str> = r.iter().map(String::as_str).collect();
        lines.push(format_line(&cells));
    }
    lines.join("\n")
}

pub fn show<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
    api: &dyn UserApi,
    id: u64,
) -> Result<Outcome> {
    let users = match connect(ui, session, api)? {
        Some(users) => users,
        None => return Ok(Outcome::NeedsLogin),
    };

    match users.get(id) {
        Ok(record) => {
            for (label, value) in COLUMNS.iter().zip(row(&record)) {
                ui.say(&format!("{:<9} {}", format!("{}:", label), value))?;
            }
            Ok(Outcome::Done)
        }
        Err(e) => report(ui, &e, "Error al cargar los datos del usuario"),
    }
}

/// Create a user (`id` is None) or edit an existing one.
///
/// Fields not given in `fields` are asked for, pre-filled with the current
/// value. When editing, a blank password keeps the current one.
pub fn save<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
    api: &dyn UserApi,
    id: Option<u64>,
    fields: &UserFields,
) -> Result<Outcome> {
    let users = match connect(ui, session, api)? {
        Some(users) => users,
        None => return Ok(Outcome::NeedsLogin),
    };
    let mode = if id.is_some() {
        FormMode::Edit
    } else {
        FormMode::Create
    };

    let mut draft = match id {
        Some(id) => match users.get(id) {
            Ok(record) => UserDraft::from_record(&record),
            Err(e) => return report(ui, &e, "Error al cargar los datos del usuario"),
        },
        None => UserDraft::default(),
    };

    ui.say(match mode {
        FormMode::Create => "Nuevo Usuario",
        FormMode::Edit => "Editar Usuario",
    })?;
    draft.apply(fields);
    fill_missing(ui, &mut draft, fields, mode)?;

    if let Err(e) = draft.validate(mode) {
        ui.say(&e.user_message())?;
        return Ok(Outcome::Failed);
    }

    let saved = match id {
        Some(id) => users.update(id, &draft),
        None => users.create(&draft),
    };
    match saved {
        Ok(record) => {
            let (msg, action) = match mode {
                FormMode::Create => ("Usuario creado con éxito", "create"),
                FormMode::Edit => ("Usuario actualizado con éxito", "update"),
            };
            ui.say(&format!("{} (ID {}).", msg, record.id))?;
            ui.record(|a| a.user_change(action, record.id));
            Ok(Outcome::Done)
        }
        Err(e) => report_form(ui, &e, "Error al guardar el usuario"),
    }
}

fn fill_missing(
    ui: &mut Ui,
    draft: &mut UserDraft,
    fields: &UserFields,
    mode: FormMode,
) -> Result<()> {
    let prompts = [
        ("Usuario", &mut draft.username, fields.username.is_some()),
        ("Nombre", &mut draft.first_name, fields.first_name.is_some()),
        ("Apellido", &mut draft.last_name, fields.last_name.is_some()),
        ("Email", &mut draft.email, fields.email.is_some()),
        ("DNI", &mut draft.dni, fields.dni.is_some()),
        ("Teléfono", &mut draft.phone_number, fields.phone_number.is_some()),
    ];
    for (label, slot, given) in prompts {
        if given {
            continue;
        }
        if let Some(answer) = ui.prompter.ask(label, slot)? {
            *slot = answer;
        }
    }

    if fields.password.is_none() {
        let label = match mode {
            FormMode::Create => "Contraseña",
            FormMode::Edit => "Contraseña (dejar en blanco para mantener la actual)",
        };
        if let Some(answer) = ui.prompter.secret(label)? {
            draft.password = answer;
        }
    }
    Ok(())
}

pub fn delete<E: AuthEndpoint, S: TokenStore>(
    ui: &mut Ui,
    session: &SessionManager<E, S>,
    api: &dyn UserApi,
    id: u64,
) -> Result<Outcome> {
    let users = match connect(ui, session, api)? {
        Some(users) => users,
        None => return Ok(Outcome::NeedsLogin),
    };

    if !ui.assume_yes
        && !ui
            .prompter
            .confirm("¿Está seguro que desea eliminar este usuario?")?
    {
        ui.say("Operación cancelada.")?;
        return Ok(Outcome::Done);
    }

    match users.delete(id) {
        Ok(()) => {
            ui.say("Usuario eliminado con éxito")?;
            ui.record(|a| a.user_change("delete", id));
            Ok(Outcome::Done)
        }
        Err(e) => report(ui, &e, "Error al eliminar el usuario"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionResult;
    use crate::identity::encode_token;
    use crate::prompt::scripted::ScriptedPrompter;
    use crate::session::stub::StubEndpoint;
    use crate::token_store::{MemoryTokenStore, StoredTokens};
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// In-memory user endpoint
    #[derive(Default)]
    struct StubUsers {
        records: RefCell<Vec<UserRecord>>,
        bearer: RefCell<Option<String>>,
        fail_with: RefCell<Option<SessionError>>,
        sent: RefCell<Vec<Value>>,
    }

    struct StubClient<'a>(&'a StubUsers);

    impl StubUsers {
        fn with(records: Vec<UserRecord>) -> Self {
            Self {
                records: RefCell::new(records),
                ..Self::default()
            }
        }

        fn failure(&self) -> SessionResult<()> {
            match self.fail_with.borrow_mut().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    impl UserApi for StubUsers {
        fn connect<'a>(&'a self, access_token: &str) -> Box<dyn UserResource + 'a> {
            *self.bearer.borrow_mut() = Some(access_token.to_string());
            Box::new(StubClient(self))
        }
    }

    impl UserResource for StubClient<'_> {
        fn list(&self) -> SessionResult<Vec<UserRecord>> {
            self.0.failure()?;
            Ok(self.0.records.borrow().clone())
        }

        fn get(&self, id: u64) -> SessionResult<UserRecord> {
            self.0.failure()?;
            self.0
                .records
                .borrow()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(SessionError::Api {
                    status: 404,
                    message: "Not found.".to_string(),
                })
        }

        fn create(&self, draft: &UserDraft) -> SessionResult<UserRecord> {
            self.0.failure()?;
            self.0.sent.borrow_mut().push(draft.payload(FormMode::Create));
            let record = UserRecord {
                id: 100,
                username: draft.username.clone(),
                first_name: draft.first_name.clone(),
                last_name: draft.last_name.clone(),
                email: draft.email.clone(),
                dni: draft.dni.parse().ok(),
                phone_number: draft.phone_number.parse().ok(),
            };
            self.0.records.borrow_mut().push(record.clone());
            Ok(record)
        }

        fn update(&self, id: u64, draft: &UserDraft) -> SessionResult<UserRecord> {
            self.0.failure()?;
            self.0.sent.borrow_mut().push(draft.payload(FormMode::Edit));
            let mut records = self.0.records.borrow_mut();
            let record = records.iter_mut().find(|r| r.id == id).unwrap();
            record.email = draft.email.clone();
            Ok(record.clone())
        }

        fn delete(&self, id: u64) -> SessionResult<()> {
            self.0.failure()?;
            self.0.records.borrow_mut().retain(|r| r.id != id);
            Ok(())
        }
    }

    fn alice() -> UserRecord {
        UserRecord {
            id: 1,
            username: "alice".into(),
            first_name: "Alice".into(),
            last_name: "Pérez".into(),
            email: "alice@example.com".into(),
            dni: Some(12345678),
            phone_number: Some(3001234567),
        }
    }

    fn token() -> String {
        encode_token(&json!({ "user_id": 1, "username": "alice", "first_name": "Alice" }))
    }

    /// Run a screen against a scripted prompter and return what it printed
    fn run<T>(
        answers: &[&str],
        assume_yes: bool,
        screen: impl FnOnce(&mut Ui) -> Result<T>,
    ) -> (T, String, ScriptedPrompter) {
        let mut out = Vec::new();
        let mut prompter = ScriptedPrompter::new(answers);
        let result = {
            let mut ui = Ui {
                out: &mut out,
                prompter: &mut prompter,
                audit: None,
                assume_yes,
            };
            screen(&mut ui).unwrap()
        };
        (result, String::from_utf8(out).unwrap(), prompter)
    }

    #[test]
    fn test_login_prompts_and_greets() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::new();
        let mut session = SessionManager::new(&endpoint, &store);

        let (outcome, out, prompter) =
            run(&["alice", "secret"], false, |ui| login(ui, &mut session, None, None));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("Bienvenido, Alice."), "{}", out);
        assert_eq!(prompter.asked, vec!["Usuario", "Contraseña"]);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_login_with_blank_fields_shows_validation() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::new();
        let mut session = SessionManager::new(&endpoint, &store);

        let (outcome, out, _) = run(&[], false, |ui| login(ui, &mut session, None, None));
        assert_eq!(outcome, Outcome::Failed);
        assert!(out.contains("Por favor ingrese usuario y contraseña"));
        assert_eq!(endpoint.token_calls.get(), 0);
    }

    #[test]
    fn test_login_messages_distinguish_failures() {
        let endpoint = StubEndpoint::failing(SessionError::Authentication("HTTP 401".into()));
        let store = MemoryTokenStore::new();
        let mut session = SessionManager::new(&endpoint, &store);
        let (_, out, _) = run(&[], false, |ui| {
            login(ui, &mut session, Some("alice"), Some("wrong"))
        });
        assert!(out.contains("Credenciales inválidas"));

        let endpoint = StubEndpoint::failing(SessionError::Transport("refused".into()));
        let mut session = SessionManager::new(&endpoint, &store);
        let (_, out, _) = run(&[], false, |ui| {
            login(ui, &mut session, Some("alice"), Some("secret"))
        });
        assert!(out.contains("Error al iniciar sesión. Intente nuevamente."));
        assert!(!out.contains("refused"));
    }

    #[test]
    fn test_login_when_already_authenticated() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let mut session = SessionManager::new(&endpoint, &store);

        let (outcome, out, _) = run(&[], false, |ui| login(ui, &mut session, None, None));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("Ya inició sesión como Alice"));
        assert_eq!(endpoint.token_calls.get(), 0);
    }

    #[test]
    fn test_screens_redirect_when_anonymous() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::new();
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::with(vec![alice()]);

        let (outcome, out, _) = run(&[], true, |ui| list(ui, &session, &users));
        assert_eq!(outcome, Outcome::NeedsLogin);
        assert!(out.contains("/login"));

        let (outcome, _, _) = run(&[], true, |ui| delete(ui, &session, &users, 1));
        assert_eq!(outcome, Outcome::NeedsLogin);
        assert_eq!(users.records.borrow().len(), 1);
        assert!(users.bearer.borrow().is_none());
    }

    #[test]
    fn test_list_renders_table_with_bearer() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::with(vec![alice()]);

        let (outcome, out, _) = run(&[], false, |ui| list(ui, &session, &users));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("Teléfono"));
        assert!(out.contains("alice@example.com"));
        assert_eq!(users.bearer.borrow().as_deref(), Some(token().as_str()));
    }

    #[test]
    fn test_list_failure_message() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::default();
        *users.fail_with.borrow_mut() = Some(SessionError::Transport("timeout".into()));

        let (outcome, out, _) = run(&[], false, |ui| list(ui, &session, &users));
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(out.trim(), "Error al cargar los usuarios");
    }

    #[test]
    fn test_rejected_bearer_asks_for_login() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::default();
        *users.fail_with.borrow_mut() = Some(SessionError::Authentication("401".into()));

        let (outcome, _, _) = run(&[], false, |ui| list(ui, &session, &users));
        assert_eq!(outcome, Outcome::NeedsLogin);
        // Session is not dropped behind the operator's back
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_render_empty_table() {
        assert_eq!(render_table(&[]), "No hay usuarios registrados");
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let table = render_table(&[alice()]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID  Usuario"));
        assert!(lines[2].starts_with("1   alice"));
    }

    #[test]
    fn test_create_from_prompts() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::default();

        let answers = [
            "bob", "Bob", "Gómez", "bob@example.com", "7654321", "6001234567", "pw",
        ];
        let (outcome, out, _) = run(&answers, false, |ui| {
            save(ui, &session, &users, None, &UserFields::default())
        });
        assert_eq!(outcome, Outcome::Done, "{}", out);
        assert!(out.contains("Usuario creado con éxito (ID 100)"));
        let sent = users.sent.borrow();
        assert_eq!(sent[0]["password"], "pw");
        assert_eq!(sent[0]["dni"], json!(7654321));
    }

    #[test]
    fn test_create_requires_password() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::default();
        let fields = UserFields {
            username: Some("bob".into()),
            email: Some("bob@example.com".into()),
            ..UserFields::default()
        };

        let (outcome, out, _) = run(&[], false, |ui| save(ui, &session, &users, None, &fields));
        assert_eq!(outcome, Outcome::Failed);
        assert!(out.contains("La contraseña es obligatoria para nuevos usuarios"));
        assert!(users.sent.borrow().is_empty());
    }

    #[test]
    fn test_edit_with_blank_password_keeps_current() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::with(vec![alice()]);
        let fields = UserFields {
            email: Some("alice@new.example.com".into()),
            ..UserFields::default()
        };

        // Keep every pre-filled value and leave the password blank
        let answers = ["alice", "Alice", "Pérez", "12345678", "3001234567", ""];
        let (outcome, out, prompter) =
            run(&answers, false, |ui| save(ui, &session, &users, Some(1), &fields));
        assert_eq!(outcome, Outcome::Done, "{}", out);
        assert!(out.contains("Usuario actualizado con éxito"));
        assert!(prompter
            .asked
            .iter()
            .any(|q| q.contains("dejar en blanco para mantener la actual")));
        assert!(!prompter.asked.iter().any(|q| q == "Email"));

        let sent = users.sent.borrow();
        assert!(sent[0].get("password").is_none());
        assert_eq!(sent[0]["email"], "alice@new.example.com");
    }

    #[test]
    fn test_edit_shows_server_field_error() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::default();
        let fields = UserFields {
            username: Some("bob".into()),
            email: Some("bob@example.com".into()),
            password: Some("pw".into()),
            ..UserFields::default()
        };
        *users.fail_with.borrow_mut() = Some(SessionError::Api {
            status: 400,
            message: "No es un número de documento válido".into(),
        });

        let (outcome, out, _) = run(&[], false, |ui| save(ui, &session, &users, None, &fields));
        assert_eq!(outcome, Outcome::Failed);
        assert!(out.contains("No es un número de documento válido"));
    }

    #[test]
    fn test_delete_needs_confirmation() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::with(vec![alice()]);

        let (_, out, _) = run(&["n"], false, |ui| delete(ui, &session, &users, 1));
        assert!(out.contains("Operación cancelada"));
        assert_eq!(users.records.borrow().len(), 1);

        let (outcome, out, _) = run(&["s"], false, |ui| delete(ui, &session, &users, 1));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("Usuario eliminado con éxito"));
        assert!(users.records.borrow().is_empty());
    }

    #[test]
    fn test_delete_with_assume_yes() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);
        let users = StubUsers::with(vec![alice()]);

        let (outcome, _, prompter) = run(&[], true, |ui| delete(ui, &session, &users, 1));
        assert_eq!(outcome, Outcome::Done);
        assert!(prompter.asked.is_empty());
    }

    #[test]
    fn test_whoami_marks_claims_advisory() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let session = SessionManager::new(&endpoint, &store);

        let (_, out, _) = run(&[], false, |ui| whoami(ui, &session));
        assert!(out.contains("Sesión activa: Alice"));
        assert!(out.contains("username: alice"));
        assert!(out.contains("sin verificar"));
    }

    #[test]
    fn test_whoami_with_opaque_token() {
        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = MemoryTokenStore::with_tokens("opaque", "rrr");
        let session = SessionManager::new(&endpoint, &store);

        let (outcome, out, _) = run(&[], false, |ui| whoami(ui, &session));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("identidad no está disponible"));
    }

    #[test]
    fn test_logout_reports_unreachable_server() {
        let mut endpoint = StubEndpoint::issuing(&token(), "rrr");
        endpoint.logout_ok = false;
        let store = MemoryTokenStore::with_tokens(&token(), "rrr");
        let mut session = SessionManager::new(&endpoint, &store);

        let (outcome, out, _) = run(&[], false, |ui| logout(ui, &mut session));
        assert_eq!(outcome, Outcome::Done);
        assert!(out.contains("no se pudo notificar al servidor"));
        assert_eq!(store.load().unwrap(), StoredTokens::default());
    }

    #[test]
    fn test_failed_login_journal_omits_typed_username() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut audit = AuditLog::open(&path, "run").unwrap();

        let endpoint = StubEndpoint::failing(SessionError::Authentication("HTTP 401".into()));
        let store = MemoryTokenStore::new();
        let mut session = SessionManager::new(&endpoint, &store);

        let mut out = Vec::new();
        let mut prompter = ScriptedPrompter::new(&[]);
        {
            let mut ui = Ui {
                out: &mut out,
                prompter: &mut prompter,
                audit: Some(&mut audit),
                assume_yes: false,
            };
            // A password typed into the username field
            login(&mut ui, &mut session, Some("hunter2-oops"), Some("x")).unwrap();
        }

        let journal = std::fs::read_to_string(&path).unwrap();
        assert!(journal.contains("\"login_failed\""));
        assert!(journal.contains("\"authentication\""));
        assert!(!journal.contains("hunter2-oops"));
    }

    #[test]
    fn test_logout_warns_when_store_survives() {
        struct StuckStore(MemoryTokenStore);

        impl TokenStore for StuckStore {
            fn save(&self, access: &str, refresh: &str) -> std::io::Result<()> {
                self.0.save(access, refresh)
            }

            fn load(&self) -> std::io::Result<StoredTokens> {
                self.0.load()
            }

            fn clear(&self) -> std::io::Result<()> {
                Err(std::io::Error::other("read-only directory"))
            }
        }

        let endpoint = StubEndpoint::issuing(&token(), "rrr");
        let store = StuckStore(MemoryTokenStore::with_tokens(&token(), "rrr"));
        let mut session = SessionManager::new(&endpoint, &store);

        let (outcome, out, _) = run(&[], false, |ui| logout(ui, &mut session));
        assert_eq!(outcome, Outcome::Failed);
        assert!(out.contains("No se pudo borrar la sesión guardada"));
    }

    #[test]
    fn test_audit_records_session_events_without_secrets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut audit = AuditLog::open(&path, "run").unwrap();

        let access = token();
        let endpoint = StubEndpoint::issuing(&access, "refresh-secret");
        let store = MemoryTokenStore::new();
        let mut session = SessionManager::new(&endpoint, &store);

        let mut out = Vec::new();
        let mut prompter = ScriptedPrompter::new(&[]);
        {
            let mut ui = Ui {
                out: &mut out,
                prompter: &mut prompter,
                audit: Some(&mut audit),
                assume_yes: false,
            };
            login(&mut ui, &mut session, Some("alice"), Some("hunter2")).unwrap();
            logout(&mut ui, &mut session).unwrap();
        }

        let journal = std::fs::read_to_string(&path).unwrap();
        assert_eq!(journal.lines().count(), 2);
        assert!(journal.contains("\"login_ok\""));
        assert!(journal.contains("\"user_id\":1"));
        assert!(!journal.contains("\"alice\""));
        assert!(!journal.contains("hunter2"));
        assert!(!journal.contains("refresh-secret"));
        assert!(!journal.contains(&access));
    }
}
