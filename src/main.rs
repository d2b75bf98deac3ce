use std::error::Error;
use std::sync::Arc;

use log::{error, info, warn};
use portfolio_client::{
    http, AppError, ChatViewModel, Config, FileStorage, SessionStore, TemperatureUnit, TodoViewModel,
    WeatherClient, WeatherViewModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One line of input. The shell routes each request to the screen that
/// owns it and answers with one [`Response`] line.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Login {
        username: String,
        password: String,
    },
    Signup {
        username: String,
        password: String,
        email: Option<String>,
    },
    Logout,
    Whoami,
    TodoList,
    TodoAdd {
        text: String,
    },
    TodoToggle {
        id: String,
    },
    TodoDelete {
        id: String,
    },
    ChatConnect,
    ChatJoin {
        room: String,
    },
    ChatSend {
        text: String,
    },
    ChatHistory,
    ChatState,
    ChatDisconnect,
    Weather {
        city: Option<String>,
        unit: Option<TemperatureUnit>,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Ok { data: Value },
    Error { error: String },
}

struct Shell {
    session: Arc<SessionStore>,
    todos: TodoViewModel,
    chat: ChatViewModel,
    weather: WeatherViewModel,
}

impl Shell {
    async fn open(config: Config) -> portfolio_client::Result<Self> {
        let client = http::build_client()?;
        let storage = Arc::new(FileStorage::new(&config.state_dir).await?);
        let session = Arc::new(SessionStore::open(client.clone(), config.api_url.clone(), storage).await?);

        Ok(Shell {
            todos: TodoViewModel::new(client.clone(), config.api_url.clone(), Arc::clone(&session)),
            chat: ChatViewModel::new(config.chat_url.clone(), Arc::clone(&session)),
            weather: WeatherViewModel::new(WeatherClient::new(client, config.geocoding_url, config.weather_url)),
            session,
        })
    }

    async fn handle(&self, request: Request) -> portfolio_client::Result<Value> {
        match request {
            Request::Login { username, password } => {
                let identity = self.session.login(&username, &password).await?;
                self.load_todos().await;
                to_value(&identity)
            }
            Request::Signup {
                username,
                password,
                email,
            } => {
                let identity = self.session.signup(&username, &password, email.as_deref()).await?;
                self.load_todos().await;
                to_value(&identity)
            }
            Request::Logout => {
                self.session.logout().await?;
                Ok(Value::Null)
            }
            Request::Whoami => to_value(&self.session.identity().await),
            Request::TodoList => to_value(&self.todos.list().await?),
            Request::TodoAdd { text } => to_value(&self.todos.create(&text).await?),
            Request::TodoToggle { id } => {
                let current = self
                    .todos
                    .state()
                    .await
                    .get(&id)
                    .map(|item| item.status)
                    .ok_or_else(|| AppError::UnknownTodo { id: id.clone() })?;
                to_value(&self.todos.toggle(&id, current).await?)
            }
            Request::TodoDelete { id } => {
                self.todos.delete(&id).await?;
                Ok(Value::Null)
            }
            Request::ChatConnect => {
                self.chat.connect().await?;
                to_value(&self.chat.state().await)
            }
            Request::ChatJoin { room } => {
                self.chat.join_room(&room).await?;
                Ok(json!({ "room": room }))
            }
            Request::ChatSend { text } => {
                self.chat.set_draft(text.clone()).await;
                Ok(json!({ "sent": self.chat.send_message(&text).await? }))
            }
            Request::ChatHistory => Ok(json!({ "sent": self.chat.request_history().await? })),
            Request::ChatState => to_value(&self.chat.state().await),
            Request::ChatDisconnect => {
                self.chat.disconnect().await;
                Ok(Value::Null)
            }
            Request::Weather { city, unit } => {
                if let Some(city) = city {
                    self.weather.set_city(city).await;
                }
                if let Some(unit) = unit {
                    self.weather.set_unit(unit).await;
                }
                let snapshot = self.weather.search().await?;
                let unit = self.weather.state().await.unit;
                Ok(json!({
                    "snapshot": snapshot,
                    "temperature": unit.format_temperature(snapshot.temperature),
                    "feels_like": unit.format_temperature(snapshot.feels_like),
                    "wind": format!("{} {}", snapshot.wind_speed, unit.wind_label()),
                    "icon": portfolio_client::weather::icon(snapshot.weather_code),
                }))
            }
        }
    }

    /// The todo screen loads as soon as someone signs in; a failure there
    /// stays on that screen.
    async fn load_todos(&self) {
        if let Err(e) = self.todos.list().await {
            warn!("Todo list unavailable after sign-in: {}", e);
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> portfolio_client::Result<Value> {
    serde_json::to_value(value).map_err(|e| AppError::Decode(e.to_string()))
}

async fn send_response(stdout: &mut io::Stdout, response: &Response) -> Result<(), Box<dyn Error>> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    info!("Using API {} and chat {}", config.api_url, config.chat_url);
    let shell = Shell::open(config).await?;

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(input) = lines.next_line().await? {
        if input.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&input) {
            Ok(request) => match shell.handle(request).await {
                Ok(data) => Response::Ok { data },
                Err(e) => Response::Error { error: e.to_string() },
            },
            Err(e) => {
                error!("Invalid request: {}", e);
                Response::Error {
                    error: format!("Invalid request: {e}"),
                }
            }
        };
        send_response(&mut stdout, &response).await?;
    }

    shell.chat.disconnect().await;
    Ok(())
}
