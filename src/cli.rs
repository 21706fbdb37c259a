use crate::{
    audit::AuditLog,
    auth_api::AuthEndpoint,
    prompt::{LinePrompter, Prompter},
    session::SessionManager,
    token_store::TokenStore,
    users::{UserApi, UserFields},
    views::{self, Outcome, Ui},
};
use anyhow::Result;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::path::PathBuf;

/// One operation, whether it came from the command line or the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Login {
        username: Option<String>,
        password: Option<String>,
    },
    Logout,
    Refresh,
    Whoami,
    List,
    Show(u64),
    /// Create when the id is None, edit otherwise
    Save(Option<u64>, UserFields),
    Delete(u64),
}

pub struct Context<E, S> {
    pub session: SessionManager<E, S>,
    pub users: Box<dyn UserApi>,
    pub audit: Option<AuditLog>,
    pub run_id: String,
    pub session_file: Option<PathBuf>,
    pub assume_yes: bool,
}

impl<E: AuthEndpoint, S: TokenStore> Context<E, S> {
    pub fn perform(
        &mut self,
        action: &Action,
        out: &mut dyn Write,
        prompter: &mut dyn Prompter,
    ) -> Result<Outcome> {
        let mut ui = Ui {
            out,
            prompter,
            audit: self.audit.as_mut(),
            assume_yes: self.assume_yes,
        };
        let session = &mut self.session;
        let users = self.users.as_ref();

        match action {
            Action::Login { username, password } => {
                views::login(&mut ui, session, username.as_deref(), password.as_deref())
            }
            Action::Logout => views::logout(&mut ui, session),
            Action::Refresh => views::refresh(&mut ui, session),
            Action::Whoami => views::whoami(&mut ui, session),
            Action::List => views::list(&mut ui, session, users),
            Action::Show(id) => views::show(&mut ui, session, users, *id),
            Action::Save(id, fields) => views::save(&mut ui, session, users, *id, fields),
            Action::Delete(id) => views::delete(&mut ui, session, users, *id),
        }
    }
}

pub fn run_once<E: AuthEndpoint, S: TokenStore>(
    ctx: &mut Context<E, S>,
    action: &Action,
    prompter: &mut dyn Prompter,
) -> Result<Outcome> {
    let mut out = std::io::stdout();
    ctx.perform(action, &mut out, prompter)
}

pub fn run_repl<E: AuthEndpoint, S: TokenStore>(
    ctx: &mut Context<E, S>,
    mut prompter: LinePrompter,
) -> Result<()> {
    let history = crate::config::home_dir().map(|dir| dir.join("history"));
    if let Some(path) = &history {
        prompter.load_history(path);
    }

    println!("useradmin - escriba /help para ver los comandos, /exit para salir");
    if let Some(name) = ctx.session.claims().and_then(|c| c.display_name()) {
        println!("Sesión activa: {}", name);
    }

    loop {
        let prompt = match ctx.session.current_claim("username").and_then(|v| v.as_str()) {
            Some(username) => format!("{}@useradmin> ", username),
            None if ctx.session.is_authenticated() => "*@useradmin> ".to_string(),
            None => "useradmin> ".to_string(),
        };
        match prompter.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if keep_in_history(line) {
                    prompter.add_history(line)?;
                }

                match parse_line(line) {
                    Ok(ShellLine::Exit) => break,
                    Ok(ShellLine::Help) => print_help(),
                    Ok(ShellLine::Session) => print_session(ctx),
                    Ok(ShellLine::Run(action)) => {
                        if let Err(e) = run_action(ctx, &action, &mut prompter) {
                            eprintln!("Error: {}", e);
                        }
                    }
                    Err(msg) => println!("{}", msg),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = prompter.save_history(path) {
            tracing::warn!(error = %e, "could not save shell history");
        }
    }
    Ok(())
}

/// Run one action; when it needs a session, go through login first and then
/// retry it once
fn run_action<E: AuthEndpoint, S: TokenStore>(
    ctx: &mut Context<E, S>,
    action: &Action,
    prompter: &mut LinePrompter,
) -> Result<()> {
    let mut out = std::io::stdout();

    if ctx.perform(action, &mut out, prompter)? != Outcome::NeedsLogin {
        return Ok(());
    }

    // The server rejected the bearer; drop it so login can start over
    if ctx.session.is_authenticated() {
        ctx.session.logout();
    }
    let login = Action::Login {
        username: None,
        password: None,
    };
    if ctx.perform(&login, &mut out, prompter)? == Outcome::Done {
        ctx.perform(action, &mut out, prompter)?;
    }
    Ok(())
}

/// History is written to disk, so typed usernames stay out of it
fn keep_in_history(line: &str) -> bool {
    line.split_whitespace().next() != Some("/login")
}

#[derive(Debug, PartialEq, Eq)]
enum ShellLine {
    Run(Action),
    Session,
    Help,
    Exit,
}

fn parse_line(line: &str) -> Result<ShellLine, String> {
    let words = shell_words::split(line).map_err(|e| format!("Entrada inválida: {}", e))?;
    let Some((cmd, rest)) = words.split_first() else {
        return Err("Escriba /help para ver los comandos".to_string());
    };

    let id_arg = || -> Result<u64, String> {
        match rest {
            [id] => id
                .parse()
                .map_err(|_| format!("ID inválido: {}", id)),
            _ => Err(format!("Uso: {} <id>", cmd)),
        }
    };

    let action = match cmd.as_str() {
        "/exit" | "/quit" => return Ok(ShellLine::Exit),
        "/help" => return Ok(ShellLine::Help),
        "/session" => return Ok(ShellLine::Session),
        "/login" => Action::Login {
            username: rest.first().cloned(),
            password: None,
        },
        "/logout" => Action::Logout,
        "/refresh" => Action::Refresh,
        "/whoami" => Action::Whoami,
        "/users" => Action::List,
        "/user" => Action::Show(id_arg()?),
        "/new" => Action::Save(None, UserFields::default()),
        "/edit" => Action::Save(Some(id_arg()?), UserFields::default()),
        "/delete" => Action::Delete(id_arg()?),
        other => {
            return Err(format!(
                "Comando desconocido: {}. Escriba /help para ver los comandos",
                other
            ))
        }
    };
    Ok(ShellLine::Run(action))
}

fn print_help() {
    println!("Comandos:");
    println!("  /login [usuario] - iniciar sesión");
    println!("  /logout          - cerrar sesión");
    println!("  /refresh         - renovar el token de acceso");
    println!("  /whoami          - mostrar la identidad de la sesión");
    println!("  /session         - estado de la sesión y archivos");
    println!("Usuarios:");
    println!("  /users           - listar usuarios");
    println!("  /user <id>       - ver un usuario");
    println!("  /new             - crear un usuario");
    println!("  /edit <id>       - editar un usuario");
    println!("  /delete <id>     - eliminar un usuario");
    println!("  /help            - mostrar esta ayuda");
    println!("  /exit            - salir");
}

fn print_session<E: AuthEndpoint, S: TokenStore>(ctx: &Context<E, S>) {
    println!("Estado: {}", ctx.session.state().as_str());
    if let Some(name) = ctx.session.claims().and_then(|c| c.display_name()) {
        println!("Usuario: {}", name);
    }
    if let Some(path) = &ctx.session_file {
        println!("Archivo de sesión: {}", path.display());
    }
    if let Some(audit) = &ctx.audit {
        println!("Auditoría: {}", audit.path.display());
    }
    println!("Ejecución: {}", ctx.run_id);
}
