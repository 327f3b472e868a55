// src/bin/servicectl.rs

//! A small service manager front end: `list`, `start <name>`, `stop [-force] <name>`.

use argbind::{ArgumentError, Class, Cli, DefinitionError, Error, Handle, Param};
use colored::*;
use std::{env, rc::Rc};

const USAGE: &str = "usage:
  servicectl [-v] list                  list available services
  servicectl [-v] start <name>          start the specified service
  servicectl [-v] stop [-force] <name>  stop the specified service";

// --- Scope Types ---

#[derive(Debug, Clone, Default)]
struct Console {
    verbose: bool,
}

impl Console {
    fn verbose(&self, message: &str) {
        if self.verbose {
            println!("{}", message.dimmed());
        }
    }
}

#[derive(Debug, Clone)]
struct ServiceManager {
    all: Vec<Service>,
}

impl ServiceManager {
    fn new() -> Self {
        Self {
            all: ["apache", "tomcat"].into_iter().map(Service::new).collect(),
        }
    }

    fn service(&self, name: &str) -> Result<Service, ArgumentError> {
        self.all
            .iter()
            .find(|service| service.name == name)
            .cloned()
            .ok_or_else(|| ArgumentError::custom(format!("unknown service: {}", name)))
    }
}

#[derive(Debug, Clone)]
struct Service {
    name: String,
}

impl Service {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug)]
struct List {
    manager: Rc<ServiceManager>,
}

#[derive(Debug)]
struct Start {
    console: Rc<Console>,
    service: Rc<Service>,
}

#[derive(Debug)]
struct Stop {
    console: Rc<Console>,
    service: Rc<Service>,
    force: bool,
}

// --- Definition ---

fn build_cli() -> Result<Cli, DefinitionError> {
    let mut cli = Cli::new();
    cli.class(
        Class::of::<Console>()
            .field("verbose", |c: &mut Console, v: bool| c.verbose = v)
            .build(),
    )
    .class(
        Class::of::<ServiceManager>()
            .factory("service", [Param::value::<String>()], |manager, slots| {
                let name: String = slots.value()?;
                Ok(manager.service(&name)?)
            })
            .build(),
    )
    .class(
        Class::of::<List>()
            .constructor([Param::context::<ServiceManager>()], |slots| {
                Ok(List {
                    manager: slots.context()?,
                })
            })
            .command("run", |list: &mut List| {
                for service in &list.manager.all {
                    println!("{}", service.name);
                }
                Ok(())
            })
            .build(),
    )
    .class(
        Class::of::<Start>()
            .constructor(
                [Param::context::<Console>(), Param::context::<Service>()],
                |slots| {
                    Ok(Start {
                        console: slots.context()?,
                        service: slots.context()?,
                    })
                },
            )
            .command("run", |start: &mut Start| {
                start.console.verbose("starting");
                println!("start {}", start.service.name);
                Ok(())
            })
            .build(),
    )
    .class(
        Class::of::<Stop>()
            .constructor(
                [
                    Param::context::<Console>(),
                    Param::context::<Service>(),
                    Param::value::<bool>(),
                ],
                |slots| {
                    Ok(Stop {
                        console: slots.context()?,
                        service: slots.context()?,
                        force: slots.value()?,
                    })
                },
            )
            .command("run", |stop: &mut Stop| {
                stop.console.verbose("stopping");
                if stop.force {
                    println!("stop {} (forced)", stop.service.name);
                } else {
                    println!("stop {}", stop.service.name);
                }
                Ok(())
            })
            .build(),
    );

    cli.begin_named("console", Handle::instance(Console::default()), "-v { verbose=v }")?
        .begin_named("manager", Handle::instance(ServiceManager::new()), "")?
        .add(Handle::class::<List>(), "list")?
        .begin_named("service", Handle::factory("manager.service"), "name")?
        .add(Handle::class::<Start>(), "start")?
        .add(Handle::class::<Stop>(), "stop -force")?
        .end()?
        .end()?
        .end()?;
    Ok(cli)
}

/// Sets up logging, runs the command line and turns errors into exit codes.
fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();

    let result = build_cli()
        .map_err(Error::from)
        .and_then(|cli| cli.run(&args));
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // --- Centralized Error Handling ---
            eprintln!("{}: {}", "Error".red().bold(), e);
            if e.as_argument_error().is_some() {
                eprintln!("{}", USAGE);
            }
            std::process::exit(1);
        }
    }
}
