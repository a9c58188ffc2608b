use std::fmt::Debug;

/// Opaque handle returned by the message source on receive. Only the source that
/// issued it can make sense of it, and it is the only way to delete the message.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// receipt handles are credentials of sorts, keep them out of logs
impl Debug for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeliveryToken(..)")
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    body: String,
    delivery_token: DeliveryToken,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        delivery_token: DeliveryToken,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            delivery_token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn delivery_token(&self) -> &DeliveryToken {
        &self.delivery_token
    }
}
