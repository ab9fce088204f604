//! Built-in command handlers.
//!
//! Every handler renders its own usage text when the request carries `-?` or
//! is missing required arguments, and reports progress as an
//! `Attempting to .../Successfully .../Failed to ...` message pair.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use svc_control_core::UpdateKind;
use svc_control_process::ScheduleSet;

use crate::controller::{CommandFn, RequestContext, ServiceController};

fn handler<F, Fut>(f: F) -> CommandFn
where
    F: Fn(Arc<ServiceController>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |controller, ctx| Box::pin(f(controller, ctx)))
}

pub(crate) fn register_builtins(controller: &Arc<ServiceController>) {
    let register = |name: &str, description: &str, run: CommandFn, advertised: bool| {
        controller.register_command(name, description, run, advertised);
    };

    register(
        "Clients",
        "Displays list of clients connected to the service",
        handler(show_clients),
        true,
    );
    register(
        "Settings",
        "Displays queryable service settings from the config file",
        handler(show_settings),
        true,
    );
    register(
        "Processes",
        "Displays list of defined service processes",
        handler(show_processes),
        true,
    );
    register(
        "Schedules",
        "Displays list of process schedules defined in the service",
        handler(show_schedules),
        true,
    );
    register(
        "History",
        "Displays list of requests received from the clients",
        handler(show_request_history),
        true,
    );
    register(
        "Help",
        "Displays list of commands supported by the service",
        handler(show_help),
        true,
    );
    register(
        "Status",
        "Displays the current service status",
        handler(show_status),
        true,
    );
    register(
        "Start",
        "Starts execution of a service or system process",
        handler(start_process),
        true,
    );
    register(
        "Abort",
        "Aborts execution of a service or system process",
        handler(abort_process),
        true,
    );
    register(
        "ReloadCryptoCache",
        "Reloads the local cryptography cache",
        handler(reload_crypto_cache),
        true,
    );
    register(
        "UpdateSettings",
        "Updates a service setting in the config file",
        handler(update_settings),
        true,
    );
    register(
        "ReloadSettings",
        "Reloads service settings from the config file",
        handler(reload_settings),
        true,
    );
    register(
        "Reschedule",
        "Reschedules a process defined in the service",
        handler(reschedule_process),
        true,
    );
    register(
        "Unschedule",
        "Unschedules a process defined in the service",
        handler(unschedule_process),
        true,
    );
    register(
        "SaveSchedules",
        "Saves process schedules to the config file",
        handler(save_schedules),
        true,
    );
    register(
        "LoadSchedules",
        "Loads process schedules from the config file",
        handler(load_schedules),
        true,
    );
    register(
        "Version",
        "Displays service version information",
        handler(show_version),
        true,
    );
    register(
        "Time",
        "Displays current system time",
        handler(show_time),
        true,
    );
    if controller.config.support_telnet_sessions {
        register(
            "Telnet",
            "Allows for a telnet session to the service server",
            handler(telnet),
            false,
        );
    }
}

// ---- rendering helpers ------------------------------------------------------

fn usage(description: &str, syntax: &str, options: &[(&str, &str)]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{description}");
    let _ = writeln!(text);
    let _ = writeln!(text, "   Usage:");
    let _ = writeln!(text, "       {syntax}");
    let _ = writeln!(text);
    let _ = writeln!(text, "   Options:");
    let _ = writeln!(text, "       {:<24}{}", "-?", "Displays this help message");
    for (switch, meaning) in options {
        let _ = writeln!(text, "       {switch:<24}{meaning}");
    }
    text
}

pub(crate) fn telnet_usage() -> String {
    usage(
        "Allows for a telnet session to the service server.",
        "Telnet -options",
        &[
            ("-connect=<password>", "Establishes a telnet session"),
            ("-disconnect", "Terminates the established telnet session"),
        ],
    )
}

fn stamp(t: Option<DateTime<Utc>>) -> String {
    t.map_or_else(
        || "[Not Executed]".to_string(),
        |t| t.format("%m/%d/%y %H:%M:%S").to_string(),
    )
}

// ---- display commands -------------------------------------------------------

async fn show_clients(controller: Arc<ServiceController>, ctx: RequestContext) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of clients currently connected to the service.",
                "Clients -options",
                &[],
            ),
        );
        return Ok(());
    }

    let sessions = controller.sessions.list();
    if sessions.is_empty() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "No clients are connected to the service.",
        );
        return Ok(());
    }

    let mut text = format!("Clients connected to {}:\n\n", controller.service_name());
    let _ = writeln!(
        text,
        "{:<20}{:<20}{:<20}{}",
        "Client", "Machine", "User", "Connected"
    );
    let _ = writeln!(
        text,
        "{:<20}{:<20}{:<20}{}",
        "-".repeat(18),
        "-".repeat(18),
        "-".repeat(18),
        "-".repeat(18)
    );
    for session in sessions {
        let _ = writeln!(
            text,
            "{:<20}{:<20}{:<20}{}",
            session.client_name,
            session.machine_name,
            session.principal.name,
            session.connected_at.format("%m/%d/%y %H:%M:%S")
        );
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_settings(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of queryable settings of the service from the config file.",
                "Settings -options",
                &[],
            ),
        );
        return Ok(());
    }

    let categories = controller.settings.categories();
    if categories.is_empty() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "No queryable settings are defined in the service.",
        );
        return Ok(());
    }

    let mut text = String::from("Queryable settings of the service:\n\n");
    let _ = writeln!(text, "{:<24}{:<24}{}", "Category", "Name", "Value");
    let _ = writeln!(
        text,
        "{:<24}{:<24}{}",
        "-".repeat(22),
        "-".repeat(22),
        "-".repeat(22)
    );
    for category in categories {
        for (name, value) in controller.settings.entries(&category) {
            let _ = writeln!(text, "{category:<24}{name:<24}{value}");
        }
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_processes(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() {
        let mut options: Vec<(&str, &str)> = Vec::new();
        if controller.config.support_system_commands {
            options.push((
                "-system",
                "Displays system processes instead of service processes",
            ));
        }
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of defined service processes or running system processes.",
                "Processes -options",
                &options,
            ),
        );
        return Ok(());
    }

    if controller.config.support_system_commands && args.exists("system") {
        let procs = controller.system_process_list();
        if procs.is_empty() {
            controller.update_status(
                Some(ctx.sender.id),
                UpdateKind::Information,
                "No system processes have been started by the service.",
            );
            return Ok(());
        }
        let mut text = String::from("System processes started by the service:\n\n");
        let _ = writeln!(text, "{:<24}{:<12}{}", "Name", "PID", "Started");
        let _ = writeln!(
            text,
            "{:<24}{:<12}{}",
            "-".repeat(22),
            "-".repeat(10),
            "-".repeat(18)
        );
        for (name, pid, started_at) in procs {
            let pid = pid.map_or_else(|| "-".to_string(), |p| p.to_string());
            let _ = writeln!(
                text,
                "{name:<24}{pid:<12}{}",
                started_at.format("%m/%d/%y %H:%M:%S")
            );
        }
        controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
        return Ok(());
    }

    let processes = controller.processes.list();
    if processes.is_empty() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "No processes are defined in the service.",
        );
        return Ok(());
    }

    let mut text = String::from("Processes defined in the service:\n\n");
    let _ = writeln!(
        text,
        "{:<24}{:<14}{:<20}{}",
        "Name", "State", "Last Exec. Start", "Last Exec. Stop"
    );
    let _ = writeln!(
        text,
        "{:<24}{:<14}{:<20}{}",
        "-".repeat(22),
        "-".repeat(12),
        "-".repeat(18),
        "-".repeat(18)
    );
    for process in processes {
        let _ = writeln!(
            text,
            "{:<24}{:<14}{:<20}{}",
            process.name,
            process.state.label(),
            stamp(process.last_started_at),
            stamp(process.last_stopped_at)
        );
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_schedules(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of schedules for processes defined in the service.",
                "Schedules -options",
                &[],
            ),
        );
        return Ok(());
    }

    let bindings = controller.schedules.list();
    if bindings.is_empty() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "No process schedules are defined in the service.",
        );
        return Ok(());
    }

    let mut text = String::from("Process schedules defined in the service:\n\n");
    let _ = writeln!(text, "{:<24}{:<22}{}", "Name", "Rule", "Last Due");
    let _ = writeln!(
        text,
        "{:<24}{:<22}{}",
        "-".repeat(22),
        "-".repeat(20),
        "-".repeat(18)
    );
    for binding in bindings {
        let last_due = binding.last_due.map_or_else(
            || "[Never]".to_string(),
            |t| t.format("%m/%d/%y %H:%M:%S").to_string(),
        );
        let _ = writeln!(
            text,
            "{:<24}{:<22}{last_due}",
            binding.name,
            binding.rule.text()
        );
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_request_history(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of recent requests received from the clients.",
                "History -options",
                &[],
            ),
        );
        return Ok(());
    }

    let records = controller.history.snapshot();
    if records.is_empty() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "No requests have been received from the clients.",
        );
        return Ok(());
    }

    let mut text = String::from("History of requests received from the clients:\n\n");
    let _ = writeln!(text, "{:<30}{:<20}{}", "Command", "Received", "Sender");
    let _ = writeln!(
        text,
        "{:<30}{:<20}{}",
        "-".repeat(28),
        "-".repeat(18),
        "-".repeat(28)
    );
    for record in records {
        let _ = writeln!(
            text,
            "{:<30}{:<20}{} from {}",
            record.request.to_command_line(),
            record.received_at.format("%m/%d/%y %H:%M:%S"),
            record.sender.principal.name,
            record.sender.machine_name
        );
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_help(controller: Arc<ServiceController>, ctx: RequestContext) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays a list of commands supported by the service.",
                "Help -options",
                &[("-advanced", "Displays advanced commands as well")],
            ),
        );
        return Ok(());
    }

    let advanced = args.exists("advanced");
    let mut text = String::from("Commands supported by the service:\n\n");
    let _ = writeln!(text, "{:<20}{}", "Command", "Description");
    let _ = writeln!(text, "{:<20}{}", "-".repeat(18), "-".repeat(40));
    for command in controller.handlers_snapshot() {
        if command.advertised || advanced {
            let _ = writeln!(text, "{:<20}{}", command.name, command.description);
        }
    }
    controller.update_status(Some(ctx.sender.id), UpdateKind::Information, text);
    Ok(())
}

async fn show_status(controller: Arc<ServiceController>, ctx: RequestContext) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays the current service status.",
                "Status -options",
                &[("-actionable", "Returns a machine-readable status record")],
            ),
        );
        return Ok(());
    }

    let uptime_seconds = controller
        .uptime()
        .map_or(0, |d| d.num_seconds().max(0));
    let processes = controller.processes.list();

    let mut text = format!("Status of service \"{}\":\n\n", controller.service_name());
    let _ = writeln!(
        text,
        "Up time: {}d {}h {}m {}s",
        uptime_seconds / 86_400,
        (uptime_seconds % 86_400) / 3_600,
        (uptime_seconds % 3_600) / 60,
        uptime_seconds % 60
    );
    let _ = writeln!(text, "Connected clients: {}", controller.sessions.len());
    let _ = writeln!(text, "Defined processes: {}", processes.len());
    for process in &processes {
        let _ = writeln!(text, "   {:<24}[{}]", process.name, process.state.label());
    }

    let attachment = json!({
        "name": controller.service_name(),
        "uptime_seconds": uptime_seconds,
        "clients": controller.sessions.len(),
        "processes": processes
            .iter()
            .map(|p| json!({ "name": p.name, "state": p.state.label() }))
            .collect::<Vec<_>>(),
    });
    controller
        .report_outcome(&ctx, "Status", true, Some(attachment), text)
        .await;
    Ok(())
}

async fn show_version(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays service version information.",
                "Version -options",
                &[("-actionable", "Returns a machine-readable version record")],
            ),
        );
        return Ok(());
    }

    let version = env!("CARGO_PKG_VERSION");
    let text = format!("{} v{version}", controller.service_name());
    controller
        .report_outcome(&ctx, "Version", true, Some(json!(version)), text)
        .await;
    Ok(())
}

async fn show_time(controller: Arc<ServiceController>, ctx: RequestContext) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Displays the current system time.",
                "Time -options",
                &[("-actionable", "Returns a machine-readable time record")],
            ),
        );
        return Ok(());
    }

    let local = chrono::Local::now();
    let text = format!(
        "Current system time: {} Local, {} UTC",
        local.format("%m/%d/%y %H:%M:%S"),
        Utc::now().format("%m/%d/%y %H:%M:%S")
    );
    controller
        .report_outcome(&ctx, "Time", true, Some(json!(local.to_rfc3339())), text)
        .await;
    Ok(())
}

// ---- process commands -------------------------------------------------------

async fn start_process(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() == 0 {
        let mut options = vec![
            ("-args=<args>", "Overrides the process arguments for this run"),
            ("-restart", "Aborts the process if executing, then starts it"),
            ("-list", "Displays the process list after the attempt"),
        ];
        if controller.config.support_system_commands {
            options.push(("-system", "Treats the name as a system executable"));
        }
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Starts execution of the specified service or system process.",
                "Start \"Process Name\" -options",
                &options,
            ),
        );
        return Ok(());
    }

    let name = args.ordered_arg(1).unwrap_or_default().to_string();
    let system = controller.config.support_system_commands && args.exists("system");
    let kind_word = if system { "system" } else { "service" };

    if args.exists("restart") {
        // Stop any running instance first; not-running is not an error here.
        if system {
            controller.abort_system_process(&name);
        } else {
            let _ = controller.processes.abort(&name);
        }
    }

    controller.update_status(
        Some(ctx.sender.id),
        UpdateKind::Information,
        format!("Attempting to start {kind_word} process \"{name}\"..."),
    );

    let result = if system {
        controller.start_system_process(&name, args.value("args").unwrap_or_default())
    } else {
        match args.value("args").map(shlex::split) {
            Some(None) => Err(anyhow::anyhow!("Process arguments could not be parsed")),
            Some(Some(list)) => controller
                .processes
                .start(&name, Some(list))
                .map_err(anyhow::Error::from),
            None => controller
                .processes
                .start(&name, None)
                .map_err(anyhow::Error::from),
        }
    };

    match result {
        Ok(()) => {
            controller
                .report_outcome(
                    &ctx,
                    "Start",
                    true,
                    None,
                    format!("Successfully started {kind_word} process \"{name}\"."),
                )
                .await;
        }
        Err(e) => {
            controller
                .report_outcome(
                    &ctx,
                    "Start",
                    false,
                    None,
                    format!("Failed to start {kind_word} process \"{name}\" - {e:#}."),
                )
                .await;
        }
    }

    if args.exists("list") {
        show_processes(controller, ctx).await?;
    }
    Ok(())
}

async fn abort_process(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() == 0 {
        let mut options = vec![("-list", "Displays the process list after the attempt")];
        if controller.config.support_system_commands {
            options.push(("-system", "Treats the name as a system process"));
        }
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Aborts the specified service or system process if executing.",
                "Abort \"Process Name\" -options",
                &options,
            ),
        );
        return Ok(());
    }

    let name = args.ordered_arg(1).unwrap_or_default().to_string();
    let system = controller.config.support_system_commands && args.exists("system");
    let kind_word = if system { "system" } else { "service" };

    controller.update_status(
        Some(ctx.sender.id),
        UpdateKind::Information,
        format!("Attempting to abort {kind_word} process \"{name}\"..."),
    );

    let result = if system {
        if controller.abort_system_process(&name) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Process is not running"))
        }
    } else {
        controller.processes.abort(&name).map_err(anyhow::Error::from)
    };

    match result {
        Ok(()) => {
            controller
                .report_outcome(
                    &ctx,
                    "Abort",
                    true,
                    None,
                    format!("Successfully aborted {kind_word} process \"{name}\"."),
                )
                .await;
        }
        Err(e) => {
            controller
                .report_outcome(
                    &ctx,
                    "Abort",
                    false,
                    None,
                    format!("Failed to abort {kind_word} process \"{name}\" - {e:#}."),
                )
                .await;
        }
    }

    if args.exists("list") {
        show_processes(controller, ctx).await?;
    }
    Ok(())
}

// ---- settings commands ------------------------------------------------------

async fn reload_crypto_cache(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    if ctx.request.arguments().contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Reloads the local system cryptography cache with data from the common cryptography cache.",
                "ReloadCryptoCache -options",
                &[],
            ),
        );
        return Ok(());
    }

    controller.update_status(
        Some(ctx.sender.id),
        UpdateKind::Information,
        "Attempting to reload cryptography cache...",
    );
    match controller.security.reload_crypto_cache() {
        Ok(()) => controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            "Successfully reloaded cryptography cache.",
        ),
        Err(e) => controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Alarm,
            format!("Failed to reload cryptography cache - {e:#}."),
        ),
    }
    Ok(())
}

async fn update_settings(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() < 3 {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Updates the specified setting under the specified category in the config file.",
                "UpdateSettings \"Category Name\" \"Setting Name\" \"Setting Value\" -options",
                &[
                    ("-add", "Adds the setting to the specified category"),
                    ("-delete", "Deletes the setting from the specified category"),
                    ("-reload", "Reloads settings from the config file afterwards"),
                    ("-list", "Displays the settings list afterwards"),
                ],
            ),
        );
        return Ok(());
    }

    let category = args.ordered_arg(1).unwrap_or_default().to_string();
    let name = args.ordered_arg(2).unwrap_or_default().to_string();
    let value = args.ordered_arg(3).unwrap_or_default().to_string();
    let target = ctx.sender.id;

    if args.exists("add") {
        controller.update_status(
            Some(target),
            UpdateKind::Information,
            format!("Attempting to add setting \"{name}\" under category \"{category}\"..."),
        );
        controller.settings.set(&category, &name, &value);
        controller.settings.save()?;
        controller.update_status(
            Some(target),
            UpdateKind::Information,
            format!("Successfully added setting \"{name}\" under category \"{category}\"."),
        );
    } else if args.exists("delete") {
        controller.update_status(
            Some(target),
            UpdateKind::Information,
            format!("Attempting to delete setting \"{name}\" under category \"{category}\"..."),
        );
        if controller.settings.remove(&category, &name) {
            controller.settings.save()?;
            controller.update_status(
                Some(target),
                UpdateKind::Information,
                format!("Successfully deleted setting \"{name}\" under category \"{category}\"."),
            );
        } else {
            controller.update_status(
                Some(target),
                UpdateKind::Alarm,
                format!(
                    "Failed to delete setting \"{name}\" under category \"{category}\" - Setting does not exist."
                ),
            );
        }
    } else {
        controller.update_status(
            Some(target),
            UpdateKind::Information,
            format!("Attempting to update setting \"{name}\" under category \"{category}\"..."),
        );
        if controller.settings.get(&category, &name).is_some() {
            controller.settings.set(&category, &name, &value);
            controller.settings.save()?;
            controller.update_status(
                Some(target),
                UpdateKind::Information,
                format!("Successfully updated setting \"{name}\" under category \"{category}\"."),
            );
        } else {
            controller.update_status(
                Some(target),
                UpdateKind::Alarm,
                format!(
                    "Failed to update setting \"{name}\" under category \"{category}\" - Setting does not exist."
                ),
            );
        }
    }

    if args.exists("reload") {
        reload_category(&controller, target, &category)?;
    }
    if args.exists("list") {
        show_settings(controller, ctx).await?;
    }
    Ok(())
}

fn reload_category(
    controller: &ServiceController,
    target: svc_control_core::SessionId,
    category: &str,
) -> anyhow::Result<()> {
    controller.update_status(
        Some(target),
        UpdateKind::Information,
        format!("Attempting to reload settings under category \"{category}\"..."),
    );
    controller.settings.load()?;
    controller.update_status(
        Some(target),
        UpdateKind::Information,
        format!("Successfully reloaded settings under category \"{category}\"."),
    );
    Ok(())
}

async fn reload_settings(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() < 1 {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Reloads settings saved under the specified category from the config file.",
                "ReloadSettings \"Category Name\" -options",
                &[],
            ),
        );
        return Ok(());
    }

    let category = args.ordered_arg(1).unwrap_or_default();
    reload_category(&controller, ctx.sender.id, category)
}

// ---- schedule commands ------------------------------------------------------

fn persist_schedules(controller: &ServiceController, target: svc_control_core::SessionId) {
    controller.update_status(
        Some(target),
        UpdateKind::Information,
        "Attempting to save process schedules to the config file...",
    );
    controller
        .schedules
        .save_to(controller.settings.as_ref());
    match controller.settings.save() {
        Ok(()) => controller.update_status(
            Some(target),
            UpdateKind::Information,
            "Successfully saved process schedules to the config file.",
        ),
        Err(e) => controller.update_status(
            Some(target),
            UpdateKind::Alarm,
            format!("Failed to save process schedules to the config file - {e:#}."),
        ),
    }
}

async fn reschedule_process(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() < 2 {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Schedules or re-schedules an existing process defined in the service.",
                "Reschedule \"Process Name\" \"Schedule Rule\" -options",
                &[
                    ("-save", "Saves all process schedules to the config file"),
                    ("-list", "Displays the schedule list afterwards"),
                ],
            ),
        );
        return Ok(());
    }

    let name = args.ordered_arg(1).unwrap_or_default().to_string();
    let rule = args.ordered_arg(2).unwrap_or_default().to_string();

    controller.update_status(
        Some(ctx.sender.id),
        UpdateKind::Information,
        format!("Attempting to schedule process \"{name}\" with rule \"{rule}\"..."),
    );

    if controller.processes.find(&name).is_none() {
        controller
            .report_outcome(
                &ctx,
                "Reschedule",
                false,
                None,
                format!("Failed to schedule process \"{name}\" - Process is not defined."),
            )
            .await;
    } else {
        match controller.schedules.schedule(&name, &rule, true) {
            Ok(_) => {
                controller
                    .report_outcome(
                        &ctx,
                        "Reschedule",
                        true,
                        None,
                        format!("Successfully scheduled process \"{name}\" with rule \"{rule}\"."),
                    )
                    .await;
            }
            Err(e) => {
                controller
                    .report_outcome(
                        &ctx,
                        "Reschedule",
                        false,
                        None,
                        format!("Failed to schedule process \"{name}\" - {e}."),
                    )
                    .await;
            }
        }
    }

    if args.exists("save") {
        persist_schedules(&controller, ctx.sender.id);
    }
    if args.exists("list") {
        show_schedules(controller, ctx).await?;
    }
    Ok(())
}

async fn unschedule_process(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() || args.ordered_count() < 1 {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Unschedules a scheduled process defined in the service.",
                "Unschedule \"Process Name\" -options",
                &[
                    ("-save", "Saves all process schedules to the config file"),
                    ("-list", "Displays the schedule list afterwards"),
                ],
            ),
        );
        return Ok(());
    }

    let name = args.ordered_arg(1).unwrap_or_default().to_string();
    controller.update_status(
        Some(ctx.sender.id),
        UpdateKind::Information,
        format!("Attempting to unschedule process \"{name}\"..."),
    );

    if controller.schedules.unschedule(&name) {
        controller
            .report_outcome(
                &ctx,
                "Unschedule",
                true,
                None,
                format!("Successfully unscheduled process \"{name}\"."),
            )
            .await;
    } else {
        controller
            .report_outcome(
                &ctx,
                "Unschedule",
                false,
                None,
                format!("Failed to unschedule process \"{name}\" - Process is not scheduled."),
            )
            .await;
    }

    if args.exists("save") {
        persist_schedules(&controller, ctx.sender.id);
    }
    if args.exists("list") {
        show_schedules(controller, ctx).await?;
    }
    Ok(())
}

async fn save_schedules(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Saves all process schedules to the config file.",
                "SaveSchedules -options",
                &[("-list", "Displays the schedule list afterwards")],
            ),
        );
        return Ok(());
    }

    persist_schedules(&controller, ctx.sender.id);
    if args.exists("list") {
        show_schedules(controller, ctx).await?;
    }
    Ok(())
}

async fn load_schedules(
    controller: Arc<ServiceController>,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let args = ctx.request.arguments();
    if args.contains_help_request() {
        controller.update_status(
            Some(ctx.sender.id),
            UpdateKind::Information,
            usage(
                "Loads all process schedules from the config file.",
                "LoadSchedules -options",
                &[("-list", "Displays the schedule list afterwards")],
            ),
        );
        return Ok(());
    }

    let target = ctx.sender.id;
    controller.update_status(
        Some(target),
        UpdateKind::Information,
        "Attempting to load process schedules from the config file...",
    );
    controller.settings.load()?;
    for (name, rule) in ScheduleSet::load_from(controller.settings.as_ref()) {
        if controller.processes.find(&name).is_none() {
            tracing::warn!(process = name, "schedule loaded for an undefined process, skipped");
            continue;
        }
        if let Err(e) = controller.schedules.schedule(&name, &rule, true) {
            controller.update_status(
                Some(target),
                UpdateKind::Warning,
                format!("Failed to schedule process \"{name}\" - {e}."),
            );
        }
    }
    controller.update_status(
        Some(target),
        UpdateKind::Information,
        "Successfully loaded process schedules from the config file.",
    );

    if args.exists("list") {
        show_schedules(controller, ctx).await?;
    }
    Ok(())
}

// ---- shell ------------------------------------------------------------------

async fn telnet(controller: Arc<ServiceController>, ctx: RequestContext) -> anyhow::Result<()> {
    controller.telnet_session(&ctx).await
}
