use std::{
	error::Error,
	fmt, str,
	time::{SystemTime, UNIX_EPOCH},
};

use base58::*;
use rand::Rng;
use sea_orm::{DbErr, TryGetError};
use serde::{Serialize, Serializer};
use sha3::{Digest, Sha3_256};


/// A 32-byte value that is stored and transmitted in its base58 form. Used for
/// session tokens, password salts and password digests.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct Token(pub(crate) [u8; 32]);

#[derive(Debug)]
pub enum TokenFromBase58Error {
	FromBase58Error(FromBase58Error),
	TooLong,
	TooShort,
}


pub fn current_timestamp() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

impl Token {
	pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

	pub fn from_base58(string: &str) -> Result<Self, TokenFromBase58Error> {
		let buffer = string.from_base58()?;
		if buffer.len() > 32 {
			Err(TokenFromBase58Error::TooLong)
		} else if buffer.len() < 32 {
			Err(TokenFromBase58Error::TooShort)
		} else {
			let mut bytes = [0u8; 32];
			bytes.copy_from_slice(&buffer);
			Ok(Self(bytes))
		}
	}

	pub fn hash(bytes: &[u8]) -> Self {
		let mut hasher = Sha3_256::new();
		hasher.update(bytes);
		let buffer: [u8; 32] = hasher.finalize().into();
		buffer.into()
	}

	/// Hashes the salt followed by the given data.
	pub fn hash_salted(salt: &Token, data: &[u8]) -> Self {
		let mut hasher = Sha3_256::new();
		hasher.update(salt.as_bytes());
		hasher.update(data);
		let buffer: [u8; 32] = hasher.finalize().into();
		buffer.into()
	}

	pub fn random(rng: &mut impl Rng) -> Self {
		let mut buffer = [0u8; 32];
		rng.fill_bytes(&mut buffer);
		Self(buffer)
	}
}

impl fmt::Debug for Token {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.to_base58()) }
}

impl From<[u8; 32]> for Token {
	fn from(other: [u8; 32]) -> Self { Self(other) }
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.to_base58()) }
}

impl Serialize for Token {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		self.to_base58().serialize(serializer)
	}
}

impl ToBase58 for Token {
	fn to_base58(&self) -> String { self.0.to_base58() }
}

impl sea_orm::TryGetable for Token {
	fn try_get_by<I: sea_orm::ColIdx>(
		res: &sea_orm::prelude::QueryResult, index: I,
	) -> Result<Self, TryGetError> {
		let string = <String as sea_orm::TryGetable>::try_get_by(res, index)?;
		Ok(Token::from_base58(&string).map_err(|e| {
			TryGetError::DbErr(DbErr::TryIntoErr {
				from: "String",
				into: "Token",
				source: Box::new(e),
			})
		})?)
	}
}

impl From<&Token> for sea_orm::Value {
	fn from(token: &Token) -> Self { sea_orm::Value::String(Some(Box::new(token.to_base58()))) }
}

impl From<Token> for sea_orm::Value {
	fn from(token: Token) -> Self { sea_orm::Value::String(Some(Box::new(token.to_base58()))) }
}

impl sea_orm::sea_query::Nullable for Token {
	fn null() -> sea_orm::Value { sea_orm::Value::String(None) }
}

impl sea_orm::sea_query::ValueType for Token {
	fn try_from(v: sea_orm::Value) -> Result<Self, sea_orm::sea_query::ValueTypeErr> {
		match v {
			sea_orm::Value::String(Some(string)) =>
				Token::from_base58(&string).map_err(|_| sea_orm::sea_query::ValueTypeErr),
			_ => Err(sea_orm::sea_query::ValueTypeErr),
		}
	}

	fn type_name() -> String { "Token".to_owned() }

	fn array_type() -> sea_orm::sea_query::ArrayType { sea_orm::sea_query::ArrayType::String }

	fn column_type() -> sea_orm::ColumnType { sea_orm::ColumnType::String(Some(45)) }
}

impl From<FromBase58Error> for TokenFromBase58Error {
	fn from(other: FromBase58Error) -> Self { Self::FromBase58Error(other) }
}

impl fmt::Display for TokenFromBase58Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::FromBase58Error(e) => match e {
				FromBase58Error::InvalidBase58Character(c, s) => {
					write!(f, "invalid base58 character {} at index {}", c, s)
				}
				FromBase58Error::InvalidBase58Length => {
					write!(f, "invalid length for a base58 string")
				}
			},
			Self::TooLong => write!(f, "string too long"),
			Self::TooShort => write!(f, "string too short"),
		}
	}
}

impl Error for TokenFromBase58Error {}
