use std::error::Error;
use std::sync::Arc;

use xdi::prelude::*;

fn main() -> Result<(), Box<dyn Error>> {
    let container = Container::new("greeter");
    container.install(AppModule::new("greeter"))?;

    let scope = Scope::new(&container, None)?;
    let guard = context::scope(&scope)?;
    run()?;
    guard.exit()?;
    Ok(())
}

#[inject]
fn run(#[dep] app: Arc<App>) {
    app.run();
}

struct AppModule {
    app_name: &'static str,
}

impl AppModule {
    fn new(app_name: &'static str) -> Self {
        Self { app_name }
    }
}

impl Module for AppModule {
    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
        configurer
            .value(Key::named::<&'static str>("app_name"), self.app_name)
            .singleton_component::<ConsoleLogger>()
            .singleton(
                Key::named::<Arc<dyn Greeter>>("english"),
                Factory::new(|args: Arguments| {
                    let logger = args.get::<ConsoleLogger>("logger")?;
                    Ok::<Arc<dyn Greeter>, BoxError>(Arc::new(EnglishGreeter { logger }))
                })
                .inject("logger", Key::of::<ConsoleLogger>()),
            )
            .singleton(
                Key::named::<Arc<dyn Greeter>>("chinese"),
                Factory::new(|args: Arguments| {
                    let logger = args.get::<ConsoleLogger>("logger")?;
                    Ok::<Arc<dyn Greeter>, BoxError>(Arc::new(ChineseGreeter { logger }))
                })
                .inject("logger", Key::of::<ConsoleLogger>()),
            )
            .component::<App>();
        Ok(())
    }
}

trait Logger: Send + Sync + 'static {
    fn log(&self, message: &str);
}

struct ConsoleLogger {
    app_name: &'static str,
}

#[component]
impl ConsoleLogger {
    #[inject]
    pub fn new(#[named("app_name")] app_name: Arc<&'static str>) -> Self {
        Self {
            app_name: *app_name,
        }
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, message: &str) {
        eprintln!("[{}] {}", self.app_name, message);
    }
}

trait Greeter: Send + Sync + 'static {
    fn greet(&self);
}

struct EnglishGreeter {
    logger: Arc<ConsoleLogger>,
}

impl Greeter for EnglishGreeter {
    fn greet(&self) {
        self.logger.log("Hello World!");
    }
}

struct ChineseGreeter {
    logger: Arc<ConsoleLogger>,
}

impl Greeter for ChineseGreeter {
    fn greet(&self) {
        self.logger.log("你好世界!");
    }
}

struct App {
    logger: Arc<ConsoleLogger>,
    greeters: Vec<Arc<dyn Greeter>>,
}

#[component]
impl App {
    #[inject]
    fn new(
        logger: Arc<ConsoleLogger>,
        #[named("english")] english: Arc<Arc<dyn Greeter>>,
        #[named("chinese")] chinese: Arc<Arc<dyn Greeter>>,
    ) -> Self {
        let greeters = vec![Arc::clone(&*english), Arc::clone(&*chinese)];
        Self { logger, greeters }
    }

    fn run(&self) {
        self.logger.log("Greeting from xdi managed objects:");
        for greeter in &self.greeters {
            greeter.greet();
        }
    }
}
