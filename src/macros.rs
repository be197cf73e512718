/// Declares an explicit signature inside an [`RpcFunction`](crate::RpcFunction) impl.
///
/// ```ignore
/// signature!("name": Type::String => Type::String);
/// ```
#[macro_export]
macro_rules! signature {
    ($($param:literal : $typ:expr),* => $returns:expr) => {
        fn signature(&self) -> $crate::Signature {
            $crate::Signature::new(
                ::std::vec![$($crate::Param::new($param, $typ)),*],
                $returns,
            )
        }
    };
}

/// Writes `Domain`, `Range`, `RangeFut` and `call` from one async body.
///
/// The body evaluates to the `Range` value and may use `?` with anything
/// convertible into [`ProcedureError`](crate::ProcedureError).
#[macro_export]
macro_rules! call {
    (async fn call(& $self:ident, $args:tt : $domain_ty:ty) -> $range_ty:ty { $($body:tt)* }) => {
        type Domain = $domain_ty;
        type Range = $range_ty;
        type RangeFut = $crate::BoxFuture<'static, ::std::result::Result<$range_ty, $crate::ProcedureError>>;

        fn call($self: ::std::sync::Arc<Self>, $args: $domain_ty) -> Self::RangeFut {
            let body = async move {
                let range: $range_ty = { $($body)* };
                ::std::result::Result::<$range_ty, $crate::ProcedureError>::Ok(range)
            };
            ::std::boxed::Box::pin(body)
        }
    };
}

#[macro_export]
macro_rules! name {
    ($name:expr) => {
        fn name(&self) -> &str {
            $name
        }
    };
}

/// Gives user types a semantic [`Type`](crate::Type) so they can be used
/// as arguments or return values.
#[macro_export]
macro_rules! typed {
    ($($rust_type:ty),+ => $rpc_type:expr) => {
        $(
            impl $crate::Typed for $rust_type {
                fn rpc_type() -> $crate::Type {
                    $rpc_type
                }
            }
        )+
    };
}
