use std::sync::Arc;
use std::time::Duration;

use iocraft::prelude::*;
use renderiq::{Project, Render, RenderStatus as Status, RenderiqClient};
use tokio::sync::watch;

const BAR_WIDTH: usize = 40;

#[derive(Default, Props)]
pub struct ProjectListProps {
    pub projects: Vec<Project>,
    pub total: u64,
}

#[component]
pub fn ProjectList(props: &ProjectListProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.projects.iter().map(|project| {
                let renders = project.render_count.unwrap_or(0);
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        Text(content: project.id.clone(), color: Color::DarkGrey)
                        Text(weight: Weight::Bold, content: format!("  {}", project.name))
                        Text(content: format!("  {} render(s)", renders))
                        #(project.platform.as_ref().map(|platform| element! {
                            Text(content: format!("  [{}]", platform), color: Color::Cyan)
                        }))
                    }
                }
            }))
            Text(content: format!("{} of {} project(s)", props.projects.len(), props.total))
        }
    }
}

#[derive(Default, Props)]
struct StatusIconProps {
    status: Option<Status>,
}

#[component]
fn StatusIcon(props: &StatusIconProps) -> impl Into<AnyElement<'static>> {
    match props.status {
        Some(Status::Pending) => element! {
            Text (
                color: Color::Reset,
                content: "◇"
            )
        }
        .into_any(),
        Some(Status::Processing) => element! {
            Spinner()
        }
        .into_any(),
        Some(Status::Completed) => element! {
            Text (
                color: Color::Green,
                content: "◆"
            )
        }
        .into_any(),
        Some(Status::Failed) => element! {
            Text (
                color: Color::Red,
                content: "▲"
            )
        }
        .into_any(),
        _ => element! {
            Text (
                color: Color::Yellow,
                content: "❓"
            )
        }
        .into_any(),
    }
}

#[derive(Default, Props)]
pub struct RenderStatusProps {
    pub render: Option<Render>,
}

#[component]
pub fn RenderStatus(props: &RenderStatusProps) -> impl Into<AnyElement<'static>> {
    let Some(render) = props.render.as_ref() else {
        return element! {
            Text(content: "Waiting for render status…")
        }
        .into_any();
    };

    let progress = render
        .progress
        .map(|p| format!("{:.0}%", p))
        .unwrap_or_else(|| "Unknown".to_owned());

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(content: "┌ ")
                View(background_color: Color::Blue) {
                    Text(content: &render.render_id, color: Color::White)
                }
            }
            Text(content: "│")
            View(flex_direction: FlexDirection::Row) {
                Text(content: "│ ")
                StatusIcon(status: Some(render.status.clone()))
                Text(weight: Weight::Bold, content: format!(" {}", render.status))
            }
            Text(content: format!("│ progress {}", progress))
            View(flex_direction: FlexDirection::Row) {
                Text(content: "└ ")
                #(render.output_url.as_ref().map(|url| element! {
                    Text(content: url.clone(), color: Color::Green)
                }))
                #(render.error.as_ref().map(|error| element! {
                    Text(content: format!("error: {}", error), color: Color::Red)
                }))
            }
        }
    }
    .into_any()
}

#[derive(Default, Props)]
pub struct FollowRenderStatusProps {
    pub client: Option<Arc<RenderiqClient>>,
    pub render_id: String,
    pub interval: Duration,
}

#[component]
pub fn FollowRenderStatus(
    props: &FollowRenderStatusProps,
    mut hooks: Hooks,
) -> impl Into<AnyElement<'static>> {
    let mut system = hooks.use_context_mut::<SystemContext>();
    let mut render = hooks.use_state(|| None::<Render>);
    let mut failure = hooks.use_state(|| None::<String>);
    let mut should_exit = hooks.use_state(|| false);
    let client = props.client.clone();
    let render_id = props.render_id.clone();
    let interval = props.interval;

    hooks.use_future(async move {
        let Some(client) = client else {
            should_exit.set(true);
            return;
        };
        loop {
            match client.render_status(&render_id).await {
                Ok(current) => {
                    let done = current.status.is_terminal();
                    render.set(Some(current));
                    if done {
                        should_exit.set(true);
                        return;
                    }
                }
                Err(e) => {
                    failure.set(Some(e.to_string()));
                    should_exit.set(true);
                    return;
                }
            }
            tokio::time::sleep(interval).await;
        }
    });

    if should_exit.get() {
        system.exit();
    }

    let render = render.read().clone();
    let failure = failure.read().clone();

    element! {
        View(flex_direction: FlexDirection::Column) {
            RenderStatus(render: render)
            #(failure.map(|message| element! {
                ErrorMessage(message: message)
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0.0f32);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while receiver.changed().await.is_ok() {
            let value = *receiver.borrow();
            percent.set(value);
        }
    });

    let value = percent.get().clamp(0.0, 100.0);
    let filled = ((value / 100.0) * BAR_WIDTH as f32).round() as usize;
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled));

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: props.title.clone())
            View(flex_direction: FlexDirection::Row) {
                Text(content: bar, color: Color::Cyan)
                Text(content: format!(" {:>5.1}%", value))
            }
        }
    }
}

#[derive(Default, Props)]
pub struct SpinnerProps {
    pub color: Option<Color>,
}

#[component]
pub fn Spinner(props: &SpinnerProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut frame = hooks.use_state(|| 0usize);

    hooks.use_future(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
            frame.set((frame.get() + 1) % 4);
        }
    });

    let spinner_chars = ["◐", "◓", "◑", "◒"];
    let current_char = spinner_chars[*frame.read()];
    let color = props.color.unwrap_or(Color::Cyan);

    element! {
        Text(content: current_char, color: color)
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(background_color: Color::Blue) {
                Text(content: " riq configuration ", color: Color::White, weight: Weight::Bold)
            }
            Text(content: "Press enter to accept the value in brackets.")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let label = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: label)
            #(props.description.as_ref().map(|description| element! {
                Text(content: description.clone(), color: Color::DarkGrey)
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        Text(content: format!("✗ {}", props.message), color: Color::Red)
    }
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        Text(content: format!("✓ {}", props.message), color: Color::Green)
    }
}
