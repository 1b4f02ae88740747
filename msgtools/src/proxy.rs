use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Generates an actor handle: a cheaply-cloneable struct with one `async fn`
/// per message, each of which sends a message over an mpsc channel to
/// whichever task owns the receiver and awaits a oneshot reply.
#[macro_export]
macro_rules! proxy {
    (
        $v:vis proxy $name:ident {
            $(
                $fv:vis async fn $fn_name:ident ($($p:ident : $pty:ty),* $(,)?) $(-> $rty:ty)?;
            )*
        }
    ) => {
        $crate::paste::paste! {
            #[derive(Clone)]
            $v struct $name {
                pipe: $crate::tokio::sync::mpsc::Sender< [<$name Message>] >
            }

            impl $name {
                #[allow(unused)]
                $v fn channel() -> ($name, [<$name Receiver>]) {
                    let (tx, rx) = $crate::tokio::sync::mpsc::channel(20);

                    (
                        $name { pipe: tx },
                        rx
                    )
                }
            }
        }

        impl $name {
            $(
                #[allow(unused)]
                $fv async fn $fn_name (&self, $($p : $pty),* ) -> $crate::proxy::Result $(< $rty >)? {
                    let (c, h) = $crate::tokio::sync::oneshot::channel();

                    $crate::paste::paste! {
                        let msg = [<$name Message>] :: [< $fn_name:camel >] {
                            $($p,)*
                            callback: c.into()
                        };
                    }

                    self.pipe.send(msg).await?;

                    Ok(h.await?)
                }
            )*
        }

        $crate::paste::paste! {
            type [<$name Receiver>] = $crate::tokio::sync::mpsc::Receiver< [<$name Message>] >;

            #[derive(Debug)]
            #[allow(unused)]
            $v enum [<$name Message>] {
                $( [< $fn_name:camel >] { $($p : $pty,)* callback: $crate::proxy::Callback $( < $rty > )? } ),*
            }
        }
    };
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// The receiving half of a single proxy call: exactly one value must be sent
/// back through it to unblock the caller.
#[derive(Debug)]
#[must_use = "this callback must be used to return a value to the caller"]
pub struct Callback<T = ()> {
    pipe: oneshot::Sender<T>,
}

impl<T> Callback<T> {
    pub fn send(self, t: T) -> Result<(), T> {
        self.pipe.send(t)
    }
}

impl<T> From<oneshot::Sender<T>> for Callback<T> {
    fn from(pipe: oneshot::Sender<T>) -> Self {
        Callback { pipe }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("actor is no longer running")]
    SendError,
    #[error("actor dropped the callback without replying")]
    Canceled(#[from] oneshot::error::RecvError),
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Error::SendError
    }
}

#[cfg(test)]
mod test {
    proxy! {
        pub proxy Test {
            pub async fn hello(name: String) -> String;

            pub async fn yeah() -> bool;
        }
    }

    async fn run(mut rx: TestReceiver) {
        let mut state = false;

        while let Some(v) = rx.recv().await {
            match v {
                TestMessage::Hello { name, callback } => {
                    let result = format!("Hello, {}!", name);
                    let _ = callback.send(result);
                }
                TestMessage::Yeah { callback } => {
                    let _ = callback.send(state);
                    state = !state;
                }
            }
        }
    }

    #[tokio::test]
    async fn test() {
        let (test, tr) = Test::channel();

        tokio::spawn(run(tr));

        let result = test.hello("2xsaiko".to_string()).await.unwrap();
        assert_eq!("Hello, 2xsaiko!", result);
        assert_eq!(false, test.yeah().await.unwrap());
        assert_eq!(true, test.yeah().await.unwrap());
    }
}
